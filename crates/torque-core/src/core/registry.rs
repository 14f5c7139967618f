use std::collections::HashMap;
use std::sync::Arc;

use glam::{Mat3, Vec3};

use crate::api::types::{BodyId, ChunkCoord};
use crate::collision::shape::{Material, Shape};
use crate::error::TorqueError;
use crate::math::inertia::{safe_inverse, world_inverse_inertia};
use crate::math::Pose;
use crate::physics::forces::DriverInput;
use crate::physics::vehicle::WheelLayout;

// ---------------------------------------------------------------------------
// Flags and state
// ---------------------------------------------------------------------------

/// Bit set of body flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BodyFlags(u8);

impl BodyFlags {
    pub const KINEMATIC: BodyFlags = BodyFlags(1 << 0);
    pub const SLEEPING: BodyFlags = BodyFlags(1 << 1);
    pub const SERVER_AUTHORITATIVE: BodyFlags = BodyFlags(1 << 2);
    /// Kept upright: pitch and roll are smoothed away every tick.
    pub const ORIENTATION_LOCK: BodyFlags = BodyFlags(1 << 3);

    pub fn contains(self, other: BodyFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn set(&mut self, other: BodyFlags, on: bool) {
        if on {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

/// Simulation state derived from the flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyState {
    Active,
    Sleeping,
    Kinematic,
}

// ---------------------------------------------------------------------------
// RigidBody
// ---------------------------------------------------------------------------

/// A simulated body. Owned by the registry; mutated only inside the crate.
#[derive(Debug, Clone)]
pub struct RigidBody {
    pub(crate) id: BodyId,
    pub(crate) pose: Pose,
    pub(crate) linear_velocity: Vec3,
    pub(crate) angular_velocity: Vec3,
    pub(crate) mass: f32,
    pub(crate) inverse_mass: f32,
    pub(crate) inverse_inertia: Mat3,
    pub(crate) shape: Arc<Shape>,
    pub(crate) material: Material,
    pub(crate) flags: BodyFlags,
    pub(crate) sleep_counter: u32,
    pub(crate) force: Vec3,
    pub(crate) torque: Vec3,
    /// Host force, impulse or driver input arrived this tick.
    pub(crate) pushed: bool,
    pub(crate) last_good: Pose,
    pub(crate) driver: DriverInput,
    pub(crate) wheels: Option<Arc<WheelLayout>>,
    /// Steering wheel angle of a wheeled body, positive to the left.
    pub(crate) steering_wheel: f32,
    /// Unloaded chunks touched by the last sweep.
    pub(crate) deferred_chunks: Vec<ChunkCoord>,
}

impl RigidBody {
    fn new(id: BodyId, shape: Shape, pose: Pose, mass: f32) -> Self {
        let pose = if pose.is_finite() {
            Pose::new(pose.position, pose.orientation.normalize())
        } else {
            log::warn!("{} spawned with a non-finite pose, placed at the origin", id);
            Pose::IDENTITY
        };
        let mut flags = BodyFlags::default();
        let usable = mass.is_finite() && mass > 0.0 && shape.is_valid();
        if !usable {
            log::warn!("{} has mass {} or an invalid shape, spawned kinematic", id, mass);
            flags.set(BodyFlags::KINEMATIC, true);
        }
        let (inverse_mass, inverse_inertia) = if usable {
            (1.0 / mass, safe_inverse(shape.inertia(mass)))
        } else {
            (0.0, Mat3::ZERO)
        };
        Self {
            id,
            pose,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            mass: if usable { mass } else { 0.0 },
            inverse_mass,
            inverse_inertia,
            shape: Arc::new(shape),
            material: Material::default(),
            flags,
            sleep_counter: 0,
            force: Vec3::ZERO,
            torque: Vec3::ZERO,
            pushed: false,
            last_good: pose,
            driver: DriverInput::default(),
            wheels: None,
            steering_wheel: 0.0,
            deferred_chunks: Vec::new(),
        }
    }

    pub fn id(&self) -> BodyId {
        self.id
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    pub fn linear_velocity(&self) -> Vec3 {
        self.linear_velocity
    }

    pub fn angular_velocity(&self) -> Vec3 {
        self.angular_velocity
    }

    pub fn mass(&self) -> f32 {
        self.mass
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn material(&self) -> Material {
        self.material
    }

    pub fn flags(&self) -> BodyFlags {
        self.flags
    }

    pub fn sleep_counter(&self) -> u32 {
        self.sleep_counter
    }

    pub fn state(&self) -> BodyState {
        if self.flags.contains(BodyFlags::KINEMATIC) {
            BodyState::Kinematic
        } else if self.flags.contains(BodyFlags::SLEEPING) {
            BodyState::Sleeping
        } else {
            BodyState::Active
        }
    }

    pub fn is_sleeping(&self) -> bool {
        self.state() == BodyState::Sleeping
    }

    pub fn is_kinematic(&self) -> bool {
        self.flags.contains(BodyFlags::KINEMATIC)
    }

    pub fn wheels(&self) -> Option<&WheelLayout> {
        self.wheels.as_deref()
    }

    pub fn view(&self) -> BodyView {
        BodyView {
            id: self.id,
            pose: self.pose,
            linear_velocity: self.linear_velocity,
            angular_velocity: self.angular_velocity,
            mass: self.mass,
            state: self.state(),
            server_authoritative: self.flags.contains(BodyFlags::SERVER_AUTHORITATIVE),
            shape: Arc::clone(&self.shape),
            material: self.material,
        }
    }

    // ---- crate-private mutation ----

    pub(crate) fn inverse_inertia_world(&self) -> Mat3 {
        world_inverse_inertia(self.inverse_inertia, self.pose.orientation)
    }

    pub(crate) fn wake(&mut self) {
        if self.flags.contains(BodyFlags::SLEEPING) {
            log::debug!("{} woke", self.id);
        }
        self.flags.set(BodyFlags::SLEEPING, false);
        self.sleep_counter = 0;
    }

    pub(crate) fn sleep(&mut self) {
        self.flags.set(BodyFlags::SLEEPING, true);
        self.linear_velocity = Vec3::ZERO;
        self.angular_velocity = Vec3::ZERO;
    }

    /// Force through the centre of mass.
    pub(crate) fn add_force(&mut self, force: Vec3) {
        self.force += force;
    }

    /// Force at a world point; adds torque `r × F`.
    pub(crate) fn add_force_at(&mut self, force: Vec3, point: Vec3) {
        self.force += force;
        self.torque += (point - self.pose.position).cross(force);
    }

    pub(crate) fn add_torque(&mut self, torque: Vec3) {
        self.torque += torque;
    }

    /// Instant velocity change. `point` defaults to the centre of mass.
    pub(crate) fn apply_impulse(&mut self, impulse: Vec3, point: Option<Vec3>) {
        self.linear_velocity += impulse * self.inverse_mass;
        if let Some(point) = point {
            let r = point - self.pose.position;
            self.angular_velocity += self.inverse_inertia_world() * r.cross(impulse);
        }
    }

    pub(crate) fn clear_accumulators(&mut self) {
        self.force = Vec3::ZERO;
        self.torque = Vec3::ZERO;
        self.pushed = false;
    }
}

/// Immutable copy of a body's public state.
#[derive(Debug, Clone)]
pub struct BodyView {
    pub id: BodyId,
    pub pose: Pose,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    pub mass: f32,
    pub state: BodyState,
    pub server_authoritative: bool,
    pub shape: Arc<Shape>,
    pub material: Material,
}

// ---------------------------------------------------------------------------
// BodyRegistry
// ---------------------------------------------------------------------------

/// Owns every body of one world. Flat Vec in insertion order plus an id index.
pub struct BodyRegistry {
    bodies: Vec<RigidBody>,
    index: HashMap<BodyId, usize>,
    next_id: u64,
}

impl BodyRegistry {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bodies: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            next_id: 1,
        }
    }

    /// Create a body with a fresh id.
    pub fn spawn(&mut self, shape: Shape, pose: Pose, mass: f32) -> Result<BodyId, TorqueError> {
        let id = BodyId(self.next_id);
        self.next_id = self
            .next_id
            .checked_add(1)
            .ok_or(TorqueError::IdSpaceExhausted)?;
        self.insert(RigidBody::new(id, shape, pose, mass));
        Ok(id)
    }

    /// Create a body with an id chosen elsewhere (a client mirroring the server).
    pub fn spawn_with_id(
        &mut self,
        id: BodyId,
        shape: Shape,
        pose: Pose,
        mass: f32,
    ) -> Result<BodyId, TorqueError> {
        if self.index.contains_key(&id) {
            return Err(TorqueError::InvalidBodyReference(id));
        }
        // u64::MAX would leave no room for the counter.
        let after = id.0.checked_add(1).ok_or(TorqueError::InvalidBodyReference(id))?;
        self.next_id = self.next_id.max(after);
        self.insert(RigidBody::new(id, shape, pose, mass));
        Ok(id)
    }

    fn insert(&mut self, body: RigidBody) {
        self.index.insert(body.id, self.bodies.len());
        self.bodies.push(body);
    }

    /// Remove a body. Later bodies keep their relative order.
    pub fn destroy(&mut self, id: BodyId) -> Result<RigidBody, TorqueError> {
        let idx = self
            .index
            .remove(&id)
            .ok_or(TorqueError::InvalidBodyReference(id))?;
        let body = self.bodies.remove(idx);
        for later in &self.bodies[idx..] {
            if let Some(slot) = self.index.get_mut(&later.id) {
                *slot -= 1;
            }
        }
        Ok(body)
    }

    pub fn get(&self, id: BodyId) -> Result<BodyView, TorqueError> {
        self.body(id)
            .map(RigidBody::view)
            .ok_or(TorqueError::InvalidBodyReference(id))
    }

    pub fn body(&self, id: BodyId) -> Option<&RigidBody> {
        self.index.get(&id).map(|&i| &self.bodies[i])
    }

    pub(crate) fn body_mut(&mut self, id: BodyId) -> Result<&mut RigidBody, TorqueError> {
        match self.index.get(&id) {
            Some(&i) => Ok(&mut self.bodies[i]),
            None => Err(TorqueError::InvalidBodyReference(id)),
        }
    }

    /// Visit every non-sleeping body in insertion order. Kinematic bodies are included.
    pub fn for_each_active(&self, f: impl FnMut(&RigidBody)) {
        self.bodies
            .iter()
            .filter(|b| b.state() != BodyState::Sleeping)
            .for_each(f);
    }

    pub fn iter(&self) -> impl Iterator<Item = &RigidBody> {
        self.bodies.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut RigidBody> {
        self.bodies.iter_mut()
    }

    /// Two distinct bodies by position, for pairwise resolution.
    pub(crate) fn pair_mut(&mut self, a: usize, b: usize) -> (&mut RigidBody, &mut RigidBody) {
        debug_assert_ne!(a, b);
        if a < b {
            let (left, right) = self.bodies.split_at_mut(b);
            (&mut left[a], &mut right[0])
        } else {
            let (left, right) = self.bodies.split_at_mut(a);
            (&mut right[0], &mut left[b])
        }
    }

    pub fn ids(&self) -> Vec<BodyId> {
        self.bodies.iter().map(|b| b.id).collect()
    }

    pub fn contains(&self, id: BodyId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }
}

impl Default for BodyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crate_box() -> Shape {
        Shape::cuboid(0.5, 0.5, 0.5)
    }

    #[test]
    fn ids_are_never_reused() {
        let mut reg = BodyRegistry::new();
        let a = reg.spawn(crate_box(), Pose::IDENTITY, 1.0).expect("spawn");
        let b = reg.spawn(crate_box(), Pose::IDENTITY, 1.0).expect("spawn");
        reg.destroy(a).expect("destroy a");
        let c = reg.spawn(crate_box(), Pose::IDENTITY, 1.0).expect("spawn");
        assert!(c != a && c != b, "reused id {:?}", c);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn destroy_keeps_insertion_order() {
        let mut reg = BodyRegistry::new();
        let ids: Vec<_> = (0..4)
            .map(|_| reg.spawn(crate_box(), Pose::IDENTITY, 1.0).expect("spawn"))
            .collect();
        reg.destroy(ids[1]).expect("destroy");
        assert_eq!(reg.ids(), vec![ids[0], ids[2], ids[3]]);
        assert!(reg.get(ids[3]).is_ok());
        assert_eq!(reg.get(ids[1]).unwrap_err(), TorqueError::InvalidBodyReference(ids[1]));
    }

    #[test]
    fn spawn_with_id_rejects_duplicates_and_advances_counter() {
        let mut reg = BodyRegistry::new();
        reg.spawn_with_id(BodyId(10), crate_box(), Pose::IDENTITY, 1.0)
            .expect("first");
        assert!(reg
            .spawn_with_id(BodyId(10), crate_box(), Pose::IDENTITY, 1.0)
            .is_err());
        let next = reg.spawn(crate_box(), Pose::IDENTITY, 1.0).expect("spawn");
        assert_eq!(next, BodyId(11));
    }

    #[test]
    fn id_space_end_is_an_error_not_a_duplicate() {
        let mut reg = BodyRegistry::new();
        assert_eq!(
            reg.spawn_with_id(BodyId(u64::MAX), crate_box(), Pose::IDENTITY, 1.0),
            Err(TorqueError::InvalidBodyReference(BodyId(u64::MAX)))
        );
        assert!(reg.is_empty());

        reg.spawn_with_id(BodyId(u64::MAX - 1), crate_box(), Pose::IDENTITY, 1.0)
            .expect("last mirrored id");
        assert_eq!(
            reg.spawn(crate_box(), Pose::IDENTITY, 1.0),
            Err(TorqueError::IdSpaceExhausted)
        );
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.ids(), vec![BodyId(u64::MAX - 1)]);
    }

    #[test]
    fn for_each_active_skips_sleepers() {
        let mut reg = BodyRegistry::new();
        let a = reg.spawn(crate_box(), Pose::IDENTITY, 1.0).expect("spawn");
        let b = reg.spawn(crate_box(), Pose::IDENTITY, 1.0).expect("spawn");
        reg.body_mut(a).expect("a").sleep();
        let mut seen = Vec::new();
        reg.for_each_active(|body| seen.push(body.id()));
        assert_eq!(seen, vec![b]);
    }

    #[test]
    fn invalid_mass_spawns_kinematic() {
        let mut reg = BodyRegistry::new();
        let id = reg.spawn(crate_box(), Pose::IDENTITY, 0.0).expect("spawn");
        assert_eq!(reg.get(id).expect("body").state, BodyState::Kinematic);
    }

    #[test]
    fn force_at_offset_point_produces_torque() {
        let mut reg = BodyRegistry::new();
        let id = reg.spawn(crate_box(), Pose::IDENTITY, 1.0).expect("spawn");
        let body = reg.body_mut(id).expect("body");
        body.add_force_at(Vec3::new(0.0, 0.0, -1.0), Vec3::new(1.0, 0.0, 0.0));
        // r × F = (1,0,0) × (0,0,-1) = (0,1,0)
        assert_eq!(body.torque, Vec3::Y);
        assert_eq!(body.force, Vec3::NEG_Z);
    }

    #[test]
    fn pair_mut_returns_requested_order() {
        let mut reg = BodyRegistry::new();
        let a = reg.spawn(crate_box(), Pose::IDENTITY, 1.0).expect("spawn");
        let b = reg.spawn(crate_box(), Pose::IDENTITY, 1.0).expect("spawn");
        let (x, y) = reg.pair_mut(1, 0);
        assert_eq!((x.id, y.id), (b, a));
    }
}
