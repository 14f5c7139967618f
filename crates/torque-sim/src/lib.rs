//! Headless loopback host for `torque-core`.
//!
//! Wires one server session and one client session together over an
//! in-memory transport so the whole core can be driven without a game.

pub mod runner;

pub use runner::{
    BusTransport, LoopbackRunner, RunSummary, StepReport, CLIENT_CONNECTION, SERVER_CONNECTION,
};
