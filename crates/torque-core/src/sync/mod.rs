pub mod client;
pub mod codec;
pub mod outbox;
pub mod quantize;
pub mod server;

pub use client::{Applied, ClientSync, CorrectionBlend, PredictionState, ReconcileConfig, Received};
pub use codec::{BodyRecord, CodecError, SyncMessage, SyncSnapshot};
pub use outbox::{spawn_sender, Outbox, Packet, SenderHandle, Transport};
pub use quantize::QuantizedState;
pub use server::{AllBodies, InterestFilter, ServerSync};
