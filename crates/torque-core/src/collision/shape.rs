use std::f32::consts::PI;

use glam::{Mat3, Vec3};

use crate::math::inertia::{box_inertia, parallel_axis, rotate_inertia, sphere_inertia};
use crate::math::{Aabb, Obb, Pose};

/// Sine of the tilt below which a box face or edge counts as level.
const FLAT_TOLERANCE: f32 = 0.05;

// ---------------------------------------------------------------------------
// Material
// ---------------------------------------------------------------------------

/// Surface response of a body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    /// 0 = fully inelastic, 1 = perfectly elastic.
    pub restitution: f32,
    pub friction: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            restitution: 0.0,
            friction: 0.5,
        }
    }
}

impl Material {
    pub fn with_restitution(mut self, restitution: f32) -> Self {
        self.restitution = restitution.clamp(0.0, 1.0);
        self
    }

    pub fn with_friction(mut self, friction: f32) -> Self {
        self.friction = friction.max(0.0);
        self
    }
}

// ---------------------------------------------------------------------------
// Shape
// ---------------------------------------------------------------------------

/// A child of a compound shape, placed relative to the parent's origin.
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundPart {
    pub pose: Pose,
    pub shape: Shape,
}

/// Collision shape of a rigid body, in body-local coordinates.
/// The body origin is its centre of mass.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Sphere { radius: f32 },
    Cuboid { half_extents: Vec3 },
    ConvexHull { points: Vec<Vec3> },
    Compound(Vec<CompoundPart>),
}

impl Shape {
    pub fn sphere(radius: f32) -> Self {
        Shape::Sphere { radius }
    }

    pub fn cuboid(hx: f32, hy: f32, hz: f32) -> Self {
        Shape::Cuboid {
            half_extents: Vec3::new(hx, hy, hz),
        }
    }

    pub fn convex_hull(points: Vec<Vec3>) -> Self {
        Shape::ConvexHull { points }
    }

    pub fn compound(parts: impl IntoIterator<Item = (Pose, Shape)>) -> Self {
        Shape::Compound(
            parts
                .into_iter()
                .map(|(pose, shape)| CompoundPart { pose, shape })
                .collect(),
        )
    }

    /// Whether the shape has positive, finite dimensions everywhere.
    pub fn is_valid(&self) -> bool {
        match self {
            Shape::Sphere { radius } => radius.is_finite() && *radius > 0.0,
            Shape::Cuboid { half_extents } => {
                half_extents.is_finite() && half_extents.cmpgt(Vec3::ZERO).all()
            }
            Shape::ConvexHull { points } => {
                !points.is_empty() && points.iter().all(|p| p.is_finite())
            }
            Shape::Compound(parts) => {
                !parts.is_empty()
                    && parts
                        .iter()
                        .all(|p| p.pose.is_finite() && p.shape.is_valid())
            }
        }
    }

    pub fn local_aabb(&self) -> Aabb {
        self.world_aabb(&Pose::IDENTITY)
    }

    pub fn world_aabb(&self, pose: &Pose) -> Aabb {
        match self {
            Shape::Sphere { radius } => {
                Aabb::from_center_half_extents(pose.position, Vec3::splat(*radius))
            }
            Shape::Cuboid { half_extents } => {
                Obb::new(pose.position, *half_extents, pose.orientation).aabb()
            }
            Shape::ConvexHull { points } => {
                Aabb::from_points(points.iter().map(|p| pose.transform_point(*p)))
            }
            Shape::Compound(parts) => parts
                .iter()
                .map(|part| part.shape.world_aabb(&pose.mul_pose(&part.pose)))
                .reduce(|a, b| a.union(&b))
                .unwrap_or_else(|| Aabb::from_center_half_extents(pose.position, Vec3::ZERO)),
        }
    }

    pub fn volume(&self) -> f32 {
        match self {
            Shape::Sphere { radius } => 4.0 / 3.0 * PI * radius.powi(3),
            Shape::Cuboid { half_extents } => {
                8.0 * half_extents.x * half_extents.y * half_extents.z
            }
            // Approximated by the bounding box.
            Shape::ConvexHull { .. } => {
                let e = self.local_aabb().half_extents();
                8.0 * e.x * e.y * e.z
            }
            Shape::Compound(parts) => parts.iter().map(|p| p.shape.volume()).sum(),
        }
    }

    /// Local inertia tensor about the body origin for the given total mass.
    /// Compound parts share the mass in proportion to their volume and are
    /// combined with the parallel axis theorem.
    pub fn inertia(&self, mass: f32) -> Mat3 {
        match self {
            Shape::Sphere { radius } => sphere_inertia(mass, *radius),
            Shape::Cuboid { half_extents } => box_inertia(mass, *half_extents),
            Shape::ConvexHull { .. } => {
                let aabb = self.local_aabb();
                parallel_axis(box_inertia(mass, aabb.half_extents()), mass, aabb.center())
            }
            Shape::Compound(parts) => {
                let total: f32 = parts.iter().map(|p| p.shape.volume()).sum();
                let n = parts.len().max(1) as f32;
                parts.iter().fold(Mat3::ZERO, |acc, part| {
                    let share = if total > 0.0 {
                        mass * part.shape.volume() / total
                    } else {
                        mass / n
                    };
                    let own = rotate_inertia(part.shape.inertia(share), part.pose.orientation);
                    acc + parallel_axis(own, share, part.pose.position)
                })
            }
        }
    }

    /// Farthest world point of the shape in `direction`. For a compound this is
    /// the support of the convex hull of all parts.
    pub fn support(&self, pose: &Pose, direction: Vec3) -> Vec3 {
        match self {
            Shape::Sphere { radius } => {
                pose.position + direction.normalize_or_zero() * *radius
            }
            Shape::Cuboid { half_extents } => {
                Obb::new(pose.position, *half_extents, pose.orientation).support(direction)
            }
            Shape::ConvexHull { points } => {
                let local = pose.inverse_rotate(direction);
                let best = points
                    .iter()
                    .copied()
                    .max_by(|a, b| a.dot(local).total_cmp(&b.dot(local)))
                    .unwrap_or(Vec3::ZERO);
                pose.transform_point(best)
            }
            Shape::Compound(parts) => parts
                .iter()
                .map(|part| part.shape.support(&pose.mul_pose(&part.pose), direction))
                .max_by(|a, b| a.dot(direction).total_cmp(&b.dot(direction)))
                .unwrap_or(pose.position),
        }
    }

    /// Where the shape bears on a surface lying in `direction`. Flat faces and
    /// edges resolve to their point nearest the centre's line of action, so a
    /// box resting level gets no spurious torque.
    pub fn contact_point(&self, pose: &Pose, direction: Vec3) -> Vec3 {
        match self {
            Shape::Cuboid { half_extents } => {
                Obb::new(pose.position, *half_extents, pose.orientation)
                    .support_feature(direction, FLAT_TOLERANCE)
            }
            Shape::Compound(parts) => parts
                .iter()
                .map(|part| {
                    let part_pose = pose.mul_pose(&part.pose);
                    (
                        part.shape.support(&part_pose, direction).dot(direction),
                        part.shape.contact_point(&part_pose, direction),
                    )
                })
                .max_by(|a, b| a.0.total_cmp(&b.0))
                .map_or(pose.position, |(_, point)| point),
            Shape::Sphere { .. } | Shape::ConvexHull { .. } => self.support(pose, direction),
        }
    }

    /// Flatten into convex pieces in world space.
    pub fn pieces<'a>(&'a self, pose: &Pose, out: &mut Vec<ConvexPiece<'a>>) {
        match self {
            Shape::Compound(parts) => {
                for part in parts {
                    part.shape.pieces(&pose.mul_pose(&part.pose), out);
                }
            }
            convex => out.push(ConvexPiece {
                shape: convex,
                pose: *pose,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Separating-axis test between convex pieces
// ---------------------------------------------------------------------------

/// One convex shape placed in the world. Never a compound.
#[derive(Debug, Clone, Copy)]
pub struct ConvexPiece<'a> {
    pub shape: &'a Shape,
    pub pose: Pose,
}

/// Overlap between two convex pieces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Penetration {
    /// Unit normal pointing from the second piece toward the first.
    pub normal: Vec3,
    pub depth: f32,
    /// Deepest point of the first piece inside the second.
    pub point: Vec3,
}

impl<'a> ConvexPiece<'a> {
    pub fn support(&self, direction: Vec3) -> Vec3 {
        self.shape.support(&self.pose, direction)
    }

    pub fn center(&self) -> Vec3 {
        match self.shape {
            Shape::ConvexHull { .. } => self.shape.world_aabb(&self.pose).center(),
            _ => self.pose.position,
        }
    }

    fn face_axes(&self) -> Option<[Vec3; 3]> {
        match self.shape {
            Shape::Sphere { .. } => None,
            // Hulls are tested on their local frame axes only.
            _ => Some([
                self.pose.orientation * Vec3::X,
                self.pose.orientation * Vec3::Y,
                self.pose.orientation * Vec3::Z,
            ]),
        }
    }

    /// Point on this piece closest to `p`. Exact for boxes and spheres.
    fn closest_point(&self, p: Vec3) -> Vec3 {
        match self.shape {
            Shape::Cuboid { half_extents } => {
                let local = self.pose.inverse_rotate(p - self.pose.position);
                self.pose
                    .transform_point(local.clamp(-*half_extents, *half_extents))
            }
            Shape::Sphere { radius } => {
                let d = p - self.pose.position;
                if d.length() <= *radius {
                    p
                } else {
                    self.pose.position + d.normalize() * *radius
                }
            }
            _ => self.center(),
        }
    }

    fn project(&self, axis: Vec3) -> (f32, f32) {
        (
            self.support(-axis).dot(axis),
            self.support(axis).dot(axis),
        )
    }
}

/// Separating-axis test. Returns `None` when the pieces are disjoint or only touch.
pub fn penetration(a: &ConvexPiece<'_>, b: &ConvexPiece<'_>) -> Option<Penetration> {
    let mut axes: Vec<Vec3> = Vec::with_capacity(16);
    let fa = a.face_axes();
    let fb = b.face_axes();
    if let Some(axs) = fa {
        axes.extend(axs);
    }
    if let Some(bxs) = fb {
        axes.extend(bxs);
    }
    if let (Some(axs), Some(bxs)) = (fa, fb) {
        for ea in axs {
            for eb in bxs {
                axes.push(ea.cross(eb));
            }
        }
    }
    if matches!(a.shape, Shape::Sphere { .. }) {
        axes.push(a.pose.position - b.closest_point(a.pose.position));
    }
    if matches!(b.shape, Shape::Sphere { .. }) {
        axes.push(a.closest_point(b.pose.position) - b.pose.position);
    }
    axes.push(a.center() - b.center());

    let between = a.center() - b.center();
    let mut best: Option<(Vec3, f32)> = None;
    for axis in axes {
        let Some(axis) = axis.try_normalize() else {
            continue;
        };
        let (a_min, a_max) = a.project(axis);
        let (b_min, b_max) = b.project(axis);
        let overlap = (a_max - b_min).min(b_max - a_min);
        if overlap <= 0.0 {
            return None;
        }
        if best.map_or(true, |(_, d)| overlap < d) {
            let oriented = if between.dot(axis) >= 0.0 { axis } else { -axis };
            best = Some((oriented, overlap));
        }
    }

    best.map(|(normal, depth)| Penetration {
        normal,
        depth,
        point: a.support(-normal),
    })
}
