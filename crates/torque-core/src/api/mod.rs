pub mod config;
pub mod session;
pub mod types;

pub use config::SessionConfig;
pub use session::{SessionRole, TickReport, WorldSession};
pub use types::{BodyId, CellCoord, ChunkCoord, ConnectionId, CHUNK_SIZE};
