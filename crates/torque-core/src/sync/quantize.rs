use glam::{Quat, Vec3};

use crate::math::Pose;

/// Position step: 1/256 unit.
pub const POSITION_SCALE: f32 = 256.0;
/// Quaternion component step: 1/4096.
pub const ORIENTATION_SCALE: f32 = 4096.0;
/// Linear velocity step: 1/128 unit/s.
pub const LINEAR_VELOCITY_SCALE: f32 = 128.0;
/// Angular velocity step: 1/1024 rad/s.
pub const ANGULAR_VELOCITY_SCALE: f32 = 1024.0;

/// A body's state at wire precision. Two states are "unchanged" when equal here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct QuantizedState {
    pub position: [i32; 3],
    pub orientation: [i16; 4],
    pub linear_velocity: [i16; 3],
    pub angular_velocity: [i16; 3],
}

fn to_i32(v: f32, scale: f32) -> i32 {
    // `as` saturates out-of-range values.
    (v * scale).round() as i32
}

fn to_i16(v: f32, scale: f32) -> i16 {
    (v * scale).round() as i16
}

impl QuantizedState {
    pub fn new(pose: &Pose, linear_velocity: Vec3, angular_velocity: Vec3) -> Self {
        let p = pose.position;
        // q and -q are the same rotation; send the one with w >= 0.
        let q = pose.orientation.normalize();
        let q = if q.w < 0.0 { -q } else { q };
        Self {
            position: [
                to_i32(p.x, POSITION_SCALE),
                to_i32(p.y, POSITION_SCALE),
                to_i32(p.z, POSITION_SCALE),
            ],
            orientation: [
                to_i16(q.x, ORIENTATION_SCALE),
                to_i16(q.y, ORIENTATION_SCALE),
                to_i16(q.z, ORIENTATION_SCALE),
                to_i16(q.w, ORIENTATION_SCALE),
            ],
            linear_velocity: linear_velocity
                .to_array()
                .map(|v| to_i16(v, LINEAR_VELOCITY_SCALE)),
            angular_velocity: angular_velocity
                .to_array()
                .map(|v| to_i16(v, ANGULAR_VELOCITY_SCALE)),
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position.map(|v| v as f32 / POSITION_SCALE))
    }

    /// Whether the orientation can be normalized.
    pub fn has_orientation(&self) -> bool {
        self.orientation.iter().any(|&c| c != 0)
    }

    pub fn orientation(&self) -> Quat {
        let [x, y, z, w] = self.orientation.map(|c| c as f32 / ORIENTATION_SCALE);
        Quat::from_xyzw(x, y, z, w).normalize()
    }

    pub fn pose(&self) -> Pose {
        Pose::new(self.position(), self.orientation())
    }

    pub fn linear_velocity(&self) -> Vec3 {
        Vec3::from_array(self.linear_velocity.map(|v| v as f32 / LINEAR_VELOCITY_SCALE))
    }

    pub fn angular_velocity(&self) -> Vec3 {
        Vec3::from_array(self.angular_velocity.map(|v| v as f32 / ANGULAR_VELOCITY_SCALE))
    }
}
