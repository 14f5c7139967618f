pub mod api;
pub mod bus;
pub mod collision;
pub mod core;
pub mod error;
pub mod math;
pub mod physics;
pub mod sync;

// Re-export key types at crate root for convenience
pub use api::config::SessionConfig;
pub use api::session::{SessionRole, TickReport, WorldSession};
pub use api::types::{BodyId, CellCoord, ChunkCoord, ConnectionId, CHUNK_SIZE};
pub use bus::event::{CoreEvent, HostEvent, Priority, SpawnRequest};
pub use bus::queue::{EventBus, Rejected};
pub use collision::shape::{CompoundPart, Material, Shape};
pub use collision::world::{GridWorld, VoxelWorld};
pub use core::registry::{BodyFlags, BodyRegistry, BodyState, BodyView, RigidBody};
pub use core::time::FixedTimestep;
pub use core::view::{SharedView, ViewFrame};
pub use error::{DesyncReason, TorqueError, WorldError};
pub use math::{Aabb, Obb, Pose};
pub use physics::forces::{DriverInput, ForceConfig};
pub use physics::integrator::{Integrator, IntegratorConfig};
pub use physics::vehicle::{Wheel, WheelLayout};
pub use sync::client::{ClientSync, ReconcileConfig};
pub use sync::codec::{CodecError, SyncMessage, SyncSnapshot};
pub use sync::outbox::{spawn_sender, Outbox, Packet, SenderHandle, Transport};
pub use sync::server::{AllBodies, InterestFilter, ServerSync};
