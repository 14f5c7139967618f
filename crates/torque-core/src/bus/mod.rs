pub mod event;
pub mod queue;

pub use event::{CoreEvent, HostEvent, Prioritized, Priority, SpawnRequest};
pub use queue::{EventBus, Rejected, DEFAULT_BUS_CAPACITY};
