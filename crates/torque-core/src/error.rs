//! Error kinds surfaced by the core.
//!
//! None of these abort a tick. The session collects them per tick in
//! `TickReport::faults` and logs them; each one is scoped to a single body,
//! connection, or producer.

use thiserror::Error;

use crate::api::types::{BodyId, ConnectionId};
use crate::sync::codec::CodecError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TorqueError {
    /// Operation referenced a body the registry does not hold. The operation no-ops.
    #[error("invalid body reference: {0}")]
    InvalidBodyReference(BodyId),

    /// Every body id has been handed out. The spawn was refused.
    #[error("body id space exhausted")]
    IdSpaceExhausted,

    /// A kinematic-only operation targeted a dynamic body. The operation no-ops.
    #[error("{0} is not kinematic")]
    NotKinematic(BodyId),

    /// Integration produced NaN or infinity. The body was reverted and put to sleep.
    #[error("non-finite state on {0}, reverted to last good pose")]
    NonFiniteState(BodyId),

    /// A snapshot could not be applied. The snapshot was dropped and a resync requested.
    #[error("protocol desync on {connection}: {reason}")]
    ProtocolDesync {
        connection: ConnectionId,
        reason: DesyncReason,
    },

    /// The event bus evicted low-priority events to make room.
    #[error("event queue overflow, {dropped} event(s) dropped so far")]
    QueueOverflow { dropped: u64 },

    /// The event bus is full of critical events; the posted event was not accepted.
    #[error("event queue full of critical events, retry later")]
    Backpressure,

    /// The world collaborator failed a query. The tick continued with the cell treated as empty.
    #[error("world collaborator unavailable: {0}")]
    WorldUnavailable(#[from] WorldError),
}

/// Why a client dropped a snapshot.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DesyncReason {
    #[error("sequence {received} is older than last applied {last_applied}")]
    SequenceRegression { received: u32, last_applied: u32 },

    #[error("malformed message: {0}")]
    Malformed(#[from] CodecError),
}

/// Failure reported by a `VoxelWorld` implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct WorldError(pub String);

impl WorldError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
