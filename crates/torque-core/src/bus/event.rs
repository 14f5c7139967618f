use std::sync::Arc;

use glam::Vec3;

use crate::api::types::{BodyId, ChunkCoord, ConnectionId};
use crate::collision::shape::{Material, Shape};
use crate::math::Pose;
use crate::physics::forces::DriverInput;
use crate::physics::vehicle::WheelLayout;

/// How the bus treats an event when it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// Superseded by the next one of its kind; evicted first.
    Droppable,
    Normal,
    /// Never evicted.
    Critical,
}

pub trait Prioritized {
    fn priority(&self) -> Priority;
}

/// Everything needed to create a body.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnRequest {
    /// Fixed id, used by clients mirroring server bodies. `None` assigns a fresh one.
    pub id: Option<BodyId>,
    /// Host correlation value echoed in `BodySpawned`.
    pub tag: u64,
    pub shape: Shape,
    pub pose: Pose,
    pub mass: f32,
    pub material: Material,
    pub kinematic: bool,
    /// Drive and grip through these wheels instead of the centre of mass.
    pub wheels: Option<Arc<WheelLayout>>,
    pub orientation_lock: bool,
}

impl SpawnRequest {
    pub fn new(shape: Shape, pose: Pose, mass: f32) -> Self {
        Self {
            id: None,
            tag: 0,
            shape,
            pose,
            mass,
            material: Material::default(),
            kinematic: false,
            wheels: None,
            orientation_lock: false,
        }
    }

    pub fn with_id(mut self, id: BodyId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_tag(mut self, tag: u64) -> Self {
        self.tag = tag;
        self
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.material = material;
        self
    }

    pub fn kinematic(mut self) -> Self {
        self.kinematic = true;
        self
    }

    pub fn with_wheels(mut self, wheels: WheelLayout) -> Self {
        self.wheels = Some(Arc::new(wheels));
        self
    }

    /// Keep the body upright; only yaw survives.
    pub fn with_orientation_lock(mut self) -> Self {
        self.orientation_lock = true;
        self
    }
}

/// Host → core.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Spawn(SpawnRequest),
    Destroy { id: BodyId },
    /// Force for the next tick. `point` in world space; `None` is the centre of mass.
    ApplyForce { id: BodyId, force: Vec3, point: Option<Vec3> },
    ApplyImpulse { id: BodyId, impulse: Vec3, point: Option<Vec3> },
    DriverInput { id: BodyId, input: DriverInput },
    SetKinematicPose { id: BodyId, pose: Pose },
    ChunkLoaded(ChunkCoord),
    ChunkUnloaded(ChunkCoord),
    /// Raw bytes received from a peer.
    Inbound { connection: ConnectionId, bytes: Vec<u8> },
}

impl Prioritized for HostEvent {
    fn priority(&self) -> Priority {
        match self {
            HostEvent::Spawn(_)
            | HostEvent::Destroy { .. }
            | HostEvent::ChunkLoaded(_)
            | HostEvent::ChunkUnloaded(_) => Priority::Critical,
            HostEvent::DriverInput { .. } => Priority::Droppable,
            HostEvent::ApplyForce { .. }
            | HostEvent::ApplyImpulse { .. }
            | HostEvent::SetKinematicPose { .. }
            | HostEvent::Inbound { .. } => Priority::Normal,
        }
    }
}

/// Core → host.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreEvent {
    BodySpawned { id: BodyId, tag: u64, pose: Pose },
    BodyUpdated { id: BodyId, pose: Pose, linear_velocity: Vec3 },
    BodyDestroyed { id: BodyId },
    BodySlept { id: BodyId },
    /// The world collaborator started failing. Raised once per degraded spell.
    SimulationDegraded { reason: String },
    SimulationRecovered,
    ResyncRequested { connection: ConnectionId },
}

impl Prioritized for CoreEvent {
    fn priority(&self) -> Priority {
        match self {
            CoreEvent::BodySpawned { .. } | CoreEvent::BodyDestroyed { .. } => Priority::Critical,
            CoreEvent::BodyUpdated { .. } => Priority::Droppable,
            CoreEvent::BodySlept { .. }
            | CoreEvent::SimulationDegraded { .. }
            | CoreEvent::SimulationRecovered
            | CoreEvent::ResyncRequested { .. } => Priority::Normal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_events_are_critical() {
        let spawn = HostEvent::Spawn(SpawnRequest::new(Shape::sphere(1.0), Pose::IDENTITY, 1.0));
        assert_eq!(spawn.priority(), Priority::Critical);
        assert_eq!(HostEvent::ChunkUnloaded(ChunkCoord::new(0, 0, 0)).priority(), Priority::Critical);
        assert_eq!(CoreEvent::BodyDestroyed { id: BodyId(1) }.priority(), Priority::Critical);
    }

    #[test]
    fn driver_input_and_updates_are_droppable() {
        let input = HostEvent::DriverInput {
            id: BodyId(1),
            input: DriverInput::default(),
        };
        assert_eq!(input.priority(), Priority::Droppable);
        let update = CoreEvent::BodyUpdated {
            id: BodyId(1),
            pose: Pose::IDENTITY,
            linear_velocity: Vec3::ZERO,
        };
        assert_eq!(update.priority(), Priority::Droppable);
    }

    #[test]
    fn spawn_request_builder() {
        let req = SpawnRequest::new(Shape::sphere(1.0), Pose::IDENTITY, 5.0)
            .with_id(BodyId(3))
            .with_tag(77)
            .kinematic();
        assert_eq!(req.id, Some(BodyId(3)));
        assert_eq!(req.tag, 77);
        assert!(req.kinematic);
    }
}
