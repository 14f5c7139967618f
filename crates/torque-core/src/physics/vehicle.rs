//! Wheeled vehicles and the upright lock.
//!
//! A body with a `WheelLayout` takes its drive force at the driven wheels'
//! contact patches instead of its centre of mass, steers with Ackermann
//! geometry, and grips sideways with a slip-angle cornering force.

use glam::{Quat, Vec3};

use crate::core::registry::RigidBody;
use crate::physics::forces::ForceConfig;

/// One wheel. `contact_patch` is body-local; -Z is forward, +Z back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Wheel {
    pub contact_patch: Vec3,
    pub driven: bool,
    pub steerable: bool,
}

impl Wheel {
    pub fn new(contact_patch: Vec3) -> Self {
        Self {
            contact_patch,
            driven: false,
            steerable: false,
        }
    }

    pub fn driven(mut self) -> Self {
        self.driven = true;
        self
    }

    pub fn steerable(mut self) -> Self {
        self.steerable = true;
        self
    }
}

/// Wheels of one vehicle plus the axle geometry derived from them.
#[derive(Debug, Clone, PartialEq)]
pub struct WheelLayout {
    wheels: Vec<Wheel>,
    wheelbase: f32,
    back_axle_offset: f32,
    driven: usize,
}

impl WheelLayout {
    pub fn new(wheels: impl IntoIterator<Item = Wheel>) -> Self {
        let wheels: Vec<Wheel> = wheels.into_iter().collect();
        let (min_z, max_z) = wheels.iter().fold((f32::MAX, f32::MIN), |(lo, hi), w| {
            (lo.min(w.contact_patch.z), hi.max(w.contact_patch.z))
        });
        let (wheelbase, back_axle_offset) = if wheels.is_empty() {
            (0.0, 0.0)
        } else {
            (max_z - min_z, max_z)
        };
        let driven = wheels.iter().filter(|w| w.driven).count();
        Self {
            wheels,
            wheelbase,
            back_axle_offset,
            driven,
        }
    }

    /// Four wheels at the bottom corners of a box: front pair steers, rear pair drives.
    pub fn four_wheel(half_width: f32, ride_height: f32, half_length: f32) -> Self {
        let patch = |x: f32, z: f32| Vec3::new(x, -ride_height, z);
        Self::new([
            Wheel::new(patch(-half_width, -half_length)).steerable(),
            Wheel::new(patch(half_width, -half_length)).steerable(),
            Wheel::new(patch(-half_width, half_length)).driven(),
            Wheel::new(patch(half_width, half_length)).driven(),
        ])
    }

    pub fn wheels(&self) -> &[Wheel] {
        &self.wheels
    }

    /// Distance between the front-most and rear-most contact patches.
    pub fn wheelbase(&self) -> f32 {
        self.wheelbase
    }

    /// Local z of the rear axle.
    pub fn back_axle_offset(&self) -> f32 {
        self.back_axle_offset
    }

    /// Steer angle of `wheel` about the body's up axis, positive to the left,
    /// for an average front-wheel angle of `average`. Each steerable wheel
    /// points at the shared turning centre on the rear axle line, so the
    /// inner wheel turns further than the outer one.
    pub fn steer_angle(&self, wheel: &Wheel, average: f32) -> f32 {
        if !wheel.steerable || average.abs() < 1e-6 {
            return 0.0;
        }
        // Turning centre at local x = -radius on the rear axle.
        let radius = self.wheelbase / average.tan();
        let along = self.back_axle_offset - wheel.contact_patch.z;
        let across = radius + wheel.contact_patch.x;
        let angle = (along / across).atan();
        if angle.is_finite() {
            angle
        } else {
            0.0
        }
    }
}

/// Drive and cornering forces at each contact patch. Also advances the
/// body's steering wheel toward the driver's input.
pub(crate) fn wheel_forces(body: &mut RigidBody, layout: &WheelLayout, config: &ForceConfig) {
    let driver = body.driver;
    body.steering_wheel = body.steering_wheel * config.steering_wheel_return
        + config.steering_wheel_rate * driver.steering();
    let average = body.steering_wheel * config.steering_ratio;

    let drive = match driver.throttle() {
        t if t > 0.0 => config.drive_force,
        t if t < 0.0 => -config.reverse_force,
        _ => 0.0,
    };
    let per_wheel = if layout.driven > 0 {
        drive / layout.driven as f32
    } else {
        0.0
    };

    let pose = body.pose;
    for wheel in &layout.wheels {
        let steer = Quat::from_rotation_y(layout.steer_angle(wheel, average));
        let forward = pose.orientation * (steer * Vec3::NEG_Z);
        let right = pose.orientation * (steer * Vec3::X);
        let patch = pose.transform_point(wheel.contact_patch);

        if wheel.driven && per_wheel != 0.0 {
            body.add_force_at(forward * per_wheel, patch);
        }

        let r = patch - pose.position;
        let velocity = body.linear_velocity + body.angular_velocity.cross(r);
        let forward_speed = velocity.dot(forward);
        let lateral_speed = velocity.dot(right);
        // Faded out at walking pace to keep a parked car from jittering.
        let slip = lateral_speed.atan2(forward_speed.abs() + 0.01)
            * (forward_speed.abs() / config.slip_fade_speed).min(1.0);
        body.add_force_at(right * (-slip * config.cornering_stiffness), patch);
    }
}

/// Pull the body upright: angular velocity keeps only its yaw part and the
/// orientation keeps only its twist about world up, each blended by
/// `smoothing` per tick.
pub(crate) fn lock_orientation(body: &mut RigidBody, smoothing: f32) {
    let yaw_rate = Vec3::Y * body.angular_velocity.y;
    body.angular_velocity = body.angular_velocity.lerp(yaw_rate, smoothing);

    let q = body.pose.orientation;
    let twist = Quat::from_xyzw(0.0, q.y, 0.0, q.w);
    // Flipped exactly upside down there is no twist to recover.
    if twist.length_squared() < 1e-8 {
        return;
    }
    let twist = twist.normalize();
    body.pose.orientation = q.slerp(twist, smoothing).normalize();
}
