use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Position + orientation of a body in world space.
/// The position is the centre of mass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    pub orientation: Quat,
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        position: Vec3::ZERO,
        orientation: Quat::IDENTITY,
    };

    pub fn new(position: Vec3, orientation: Quat) -> Self {
        Self {
            position,
            orientation,
        }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            orientation: Quat::IDENTITY,
        }
    }

    /// Local point → world point.
    pub fn transform_point(&self, local: Vec3) -> Vec3 {
        self.orientation * local + self.position
    }

    /// World direction → local direction.
    pub fn inverse_rotate(&self, world: Vec3) -> Vec3 {
        self.orientation.inverse() * world
    }

    /// Compose a child pose expressed in this pose's frame.
    pub fn mul_pose(&self, child: &Pose) -> Pose {
        Pose {
            position: self.transform_point(child.position),
            orientation: (self.orientation * child.orientation).normalize(),
        }
    }

    /// Linear position, spherical orientation interpolation.
    pub fn lerp(&self, other: &Pose, t: f32) -> Pose {
        Pose {
            position: self.position.lerp(other.position, t),
            orientation: self.orientation.slerp(other.orientation, t).normalize(),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.orientation.is_finite()
    }

    /// Body forward direction. Model space uses -Z as forward.
    pub fn forward(&self) -> Vec3 {
        self.orientation * Vec3::NEG_Z
    }

    pub fn up(&self) -> Vec3 {
        self.orientation * Vec3::Y
    }
}
