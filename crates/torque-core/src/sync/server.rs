use std::collections::{BTreeMap, HashMap, HashSet};

use crate::api::types::{BodyId, ConnectionId};
use crate::core::registry::{BodyRegistry, RigidBody};
use crate::sync::codec::{BodyRecord, SyncSnapshot};
use crate::sync::quantize::QuantizedState;

/// Decides which bodies a connection is told about.
pub trait InterestFilter: Send + Sync {
    fn is_interested(&self, connection: ConnectionId, body: &RigidBody) -> bool;
}

/// Every connection sees every body.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllBodies;

impl InterestFilter for AllBodies {
    fn is_interested(&self, _connection: ConnectionId, _body: &RigidBody) -> bool {
        true
    }
}

#[derive(Default)]
struct ConnectionState {
    /// Last quantized state sent for each body.
    baseline: HashMap<BodyId, QuantizedState>,
    next_sequence: u32,
}

/// Server side of the synchronization protocol: one baseline per connection.
pub struct ServerSync {
    connections: BTreeMap<ConnectionId, ConnectionState>,
    filter: Box<dyn InterestFilter>,
    max_records: usize,
}

impl ServerSync {
    pub fn new(max_records: usize) -> Self {
        Self {
            connections: BTreeMap::new(),
            filter: Box::new(AllBodies),
            max_records: max_records.clamp(1, u16::MAX as usize),
        }
    }

    pub fn with_filter(mut self, filter: impl InterestFilter + 'static) -> Self {
        self.filter = Box::new(filter);
        self
    }

    /// Start tracking a connection. Its first snapshot carries every visible body.
    pub fn connect(&mut self, connection: ConnectionId) {
        self.connections.entry(connection).or_insert_with(|| ConnectionState {
            baseline: HashMap::new(),
            next_sequence: 1,
        });
        log::info!("{} connected", connection);
    }

    pub fn disconnect(&mut self, connection: ConnectionId) -> bool {
        let known = self.connections.remove(&connection).is_some();
        if known {
            log::info!("{} disconnected", connection);
        }
        known
    }

    pub fn is_connected(&self, connection: ConnectionId) -> bool {
        self.connections.contains_key(&connection)
    }

    pub fn connections(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.connections.keys().copied()
    }

    /// Forget what was sent so the next snapshot is complete.
    pub fn resync(&mut self, connection: ConnectionId, last_applied: u32) -> bool {
        match self.connections.get_mut(&connection) {
            Some(state) => {
                log::info!("{} requested resync after sequence {}", connection, last_applied);
                state.baseline.clear();
                true
            }
            None => {
                log::warn!("resync request from unknown {}", connection);
                false
            }
        }
    }

    /// Build this tick's snapshots. Connections with nothing to report get none
    /// and keep their sequence number.
    pub fn build(&mut self, registry: &BodyRegistry) -> Vec<(ConnectionId, SyncSnapshot)> {
        let mut out = Vec::new();
        for (&connection, state) in self.connections.iter_mut() {
            let mut records = Vec::new();
            let mut visible = HashSet::new();
            for body in registry.iter() {
                if !body.pose().is_finite() || !self.filter.is_interested(connection, body) {
                    continue;
                }
                visible.insert(body.id());
                let quantized =
                    QuantizedState::new(&body.pose(), body.linear_velocity(), body.angular_velocity());
                if state.baseline.get(&body.id()) == Some(&quantized) {
                    continue;
                }
                // Bodies past the cap stay stale and go out next tick.
                if records.len() < self.max_records {
                    state.baseline.insert(body.id(), quantized);
                    records.push(BodyRecord {
                        id: body.id(),
                        state: quantized,
                    });
                }
            }

            let mut removed: Vec<BodyId> = state
                .baseline
                .keys()
                .filter(|id| !visible.contains(id))
                .copied()
                .collect();
            removed.sort();
            removed.truncate(u16::MAX as usize);
            for id in &removed {
                state.baseline.remove(id);
            }

            if records.is_empty() && removed.is_empty() {
                continue;
            }
            let sequence = state.next_sequence;
            state.next_sequence = state.next_sequence.wrapping_add(1);
            out.push((
                connection,
                SyncSnapshot {
                    sequence,
                    records,
                    removed,
                },
            ));
        }
        out
    }
}
