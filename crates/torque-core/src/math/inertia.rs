//! Inertia-tensor helpers. All tensors are about the body's centre of mass
//! and expressed in the body's local frame unless stated otherwise.

use glam::{Mat3, Quat, Vec3};

/// Solid box with the given half extents.
pub fn box_inertia(mass: f32, half_extents: Vec3) -> Mat3 {
    let s = half_extents * half_extents;
    let k = mass / 3.0;
    Mat3::from_diagonal(Vec3::new(k * (s.y + s.z), k * (s.x + s.z), k * (s.x + s.y)))
}

/// Solid sphere.
pub fn sphere_inertia(mass: f32, radius: f32) -> Mat3 {
    Mat3::from_diagonal(Vec3::splat(0.4 * mass * radius * radius))
}

/// Express a part's tensor in a frame rotated by `rotation`: `R·I·Rᵀ`.
pub fn rotate_inertia(inertia: Mat3, rotation: Quat) -> Mat3 {
    let r = Mat3::from_quat(rotation);
    r * inertia * r.transpose()
}

/// Parallel axis theorem: shift a tensor about a part's own centre to an
/// axis displaced by `offset`.
pub fn parallel_axis(inertia: Mat3, mass: f32, offset: Vec3) -> Mat3 {
    let outer = Mat3::from_cols(offset * offset.x, offset * offset.y, offset * offset.z);
    inertia + (Mat3::IDENTITY * offset.length_squared() - outer) * mass
}

/// Inverse of a tensor, or zero when the tensor is singular (immovable axis).
pub fn safe_inverse(inertia: Mat3) -> Mat3 {
    let det = inertia.determinant();
    if det.abs() <= f32::EPSILON || !det.is_finite() {
        return Mat3::ZERO;
    }
    inertia.inverse()
}

/// World-space inverse inertia for a body at the given orientation.
pub fn world_inverse_inertia(local_inverse: Mat3, orientation: Quat) -> Mat3 {
    rotate_inertia(local_inverse, orientation)
}
