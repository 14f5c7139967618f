use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::collision::world::VoxelWorld;
use crate::core::registry::RigidBody;
use crate::physics::vehicle;

/// Decoded driver controls for one vehicle body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverInput {
    pub forward: bool,
    pub backward: bool,
    pub left: bool,
    pub right: bool,
}

impl DriverInput {
    pub fn is_idle(&self) -> bool {
        !(self.forward || self.backward || self.left || self.right)
    }

    /// Forward wins over backward.
    pub fn throttle(&self) -> f32 {
        if self.forward {
            1.0
        } else if self.backward {
            -1.0
        } else {
            0.0
        }
    }

    /// +1 turns left (counter-clockwise seen from above), -1 turns right.
    pub fn steering(&self) -> f32 {
        (self.left as i8 - self.right as i8) as f32
    }
}

/// Environmental and drive force parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForceConfig {
    pub gravity: Vec3,
    pub drag_coefficient: f32,
    pub air_density: f32,
    /// Frontal area used by the drag equation, in square units.
    pub reference_area: f32,
    /// Drag is skipped below this squared speed.
    pub drag_min_speed_sq: f32,
    /// Per-tick angular velocity multiplier when spinning slowly.
    pub angular_damping_slow: f32,
    /// Per-tick angular velocity multiplier otherwise.
    pub angular_damping_fast: f32,
    pub angular_damping_threshold_sq: f32,
    /// Upward force while the body centre is in a liquid cell.
    pub buoyancy: f32,
    pub drive_force: f32,
    pub reverse_force: f32,
    /// Yaw torque for bodies without wheels.
    pub steering_torque: f32,
    /// Per-tick decay of a wheeled body's steering wheel angle.
    pub steering_wheel_return: f32,
    /// Steering wheel radians added per tick of held input.
    pub steering_wheel_rate: f32,
    /// Road wheel angle per steering wheel radian.
    pub steering_ratio: f32,
    /// Lateral force per radian of slip angle, per wheel.
    pub cornering_stiffness: f32,
    /// Below this forward speed the cornering force fades out linearly.
    pub slip_fade_speed: f32,
    /// Blend factor per tick for orientation-locked bodies.
    pub orientation_lock_smoothing: f32,
}

impl Default for ForceConfig {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, -9.8, 0.0),
            drag_coefficient: 0.5,
            air_density: 1.225,
            reference_area: 2.0,
            drag_min_speed_sq: 0.01,
            angular_damping_slow: 0.2,
            angular_damping_fast: 0.8,
            angular_damping_threshold_sq: 0.1,
            buoyancy: 1000.0,
            drive_force: 10_000.0,
            reverse_force: 5_000.0,
            steering_torque: 2_000.0,
            steering_wheel_return: 0.9,
            steering_wheel_rate: 0.1,
            steering_ratio: 0.1,
            cornering_stiffness: 15_000.0,
            slip_fade_speed: 3.0,
            orientation_lock_smoothing: 0.3,
        }
    }
}

impl ForceConfig {
    /// Aerodynamic drag `½·Cd·ρ·A·|v|²`, opposite to the velocity.
    pub fn drag(&self, velocity: Vec3) -> Vec3 {
        let speed_sq = velocity.length_squared();
        if speed_sq < self.drag_min_speed_sq {
            return Vec3::ZERO;
        }
        let magnitude = 0.5 * self.drag_coefficient * self.air_density * self.reference_area * speed_sq;
        -velocity.normalize() * magnitude
    }

    pub fn damp_angular(&self, angular_velocity: Vec3) -> Vec3 {
        if angular_velocity.length_squared() < self.angular_damping_threshold_sq {
            angular_velocity * self.angular_damping_slow
        } else {
            angular_velocity * self.angular_damping_fast
        }
    }
}

/// Add this tick's environmental and driver forces to the body's accumulators.
/// Host forces were added when their events were applied.
pub fn accumulate(body: &mut RigidBody, config: &ForceConfig, world: &dyn VoxelWorld) {
    body.add_force(config.gravity * body.mass);
    body.add_force(config.drag(body.linear_velocity));

    let center_cell = body.pose.position.floor().as_ivec3();
    if world.is_liquid(center_cell) {
        body.add_force(Vec3::Y * config.buoyancy);
    }

    if let Some(wheels) = body.wheels.clone() {
        vehicle::wheel_forces(body, &wheels, config);
        return;
    }

    let driver = body.driver;
    if !driver.is_idle() {
        let drive = match driver.throttle() {
            t if t > 0.0 => config.drive_force,
            t if t < 0.0 => -config.reverse_force,
            _ => 0.0,
        };
        body.add_force(body.pose.forward() * drive);
        body.add_torque(body.pose.up() * (config.steering_torque * driver.steering()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::shape::Shape;
    use crate::collision::world::GridWorld;
    use crate::core::registry::BodyRegistry;
    use crate::math::Pose;
    use crate::physics::vehicle::WheelLayout;
    use glam::IVec3;
    use std::sync::Arc;

    #[test]
    fn drag_opposes_velocity_and_scales_quadratically() {
        let cfg = ForceConfig::default();
        let d1 = cfg.drag(Vec3::new(2.0, 0.0, 0.0));
        let d2 = cfg.drag(Vec3::new(4.0, 0.0, 0.0));
        assert!(d1.x < 0.0);
        assert!((d2.x / d1.x - 4.0).abs() < 1e-4, "ratio {}", d2.x / d1.x);
        // 0.5 * 0.5 * 1.225 * 2.0 * 4 = 2.45
        assert!((d1.x + 2.45).abs() < 1e-4, "d1 {}", d1.x);
    }

    #[test]
    fn drag_skipped_when_nearly_still() {
        let cfg = ForceConfig::default();
        assert_eq!(cfg.drag(Vec3::new(0.05, 0.0, 0.0)), Vec3::ZERO);
    }

    #[test]
    fn angular_damping_picks_factor_by_speed() {
        let cfg = ForceConfig::default();
        assert_eq!(cfg.damp_angular(Vec3::new(0.1, 0.0, 0.0)), Vec3::new(0.02, 0.0, 0.0));
        assert_eq!(cfg.damp_angular(Vec3::new(1.0, 0.0, 0.0)), Vec3::new(0.8, 0.0, 0.0));
    }

    #[test]
    fn driver_pushes_along_negative_z_and_steers_about_up() {
        let world = GridWorld::new();
        let cfg = ForceConfig {
            gravity: Vec3::ZERO,
            ..ForceConfig::default()
        };
        let mut reg = BodyRegistry::new();
        let id = reg.spawn(Shape::cuboid(1.0, 0.5, 2.0), Pose::IDENTITY, 1000.0).expect("spawn");
        let body = reg.body_mut(id).expect("body");
        body.driver = DriverInput {
            forward: true,
            left: true,
            ..DriverInput::default()
        };
        accumulate(body, &cfg, &world);
        assert_eq!(body.force, Vec3::new(0.0, 0.0, -10_000.0));
        assert_eq!(body.torque, Vec3::new(0.0, 2_000.0, 0.0));
    }

    #[test]
    fn wheeled_body_drives_at_its_wheels_without_yaw_torque() {
        let world = GridWorld::new();
        let cfg = ForceConfig {
            gravity: Vec3::ZERO,
            ..ForceConfig::default()
        };
        let mut reg = BodyRegistry::new();
        let id = reg.spawn(Shape::cuboid(1.0, 0.5, 2.0), Pose::IDENTITY, 1000.0).expect("spawn");
        let body = reg.body_mut(id).expect("body");
        body.wheels = Some(Arc::new(WheelLayout::four_wheel(0.9, 0.5, 1.5)));
        body.driver = DriverInput {
            forward: true,
            left: true,
            ..DriverInput::default()
        };
        accumulate(body, &cfg, &world);
        assert!((body.force.z + 10_000.0).abs() < 1.0, "force {:?}", body.force);
        // Standing still, so the steered front wheels make no cornering force yet.
        assert!(body.torque.y.abs() < 1e-3, "torque {:?}", body.torque);
        assert!(body.steering_wheel > 0.0);
    }

    #[test]
    fn buoyancy_lifts_body_in_liquid() {
        let world = GridWorld::new();
        world.set_liquid(IVec3::new(0, 0, 0), true);
        let cfg = ForceConfig::default();
        let mut reg = BodyRegistry::new();
        let id = reg.spawn(Shape::sphere(0.4), Pose::from_position(Vec3::splat(0.5)), 10.0).expect("spawn");
        let body = reg.body_mut(id).expect("body");
        accumulate(body, &cfg, &world);
        assert!((body.force.y - (1000.0 - 98.0)).abs() < 1e-3, "force {:?}", body.force);
    }
}
