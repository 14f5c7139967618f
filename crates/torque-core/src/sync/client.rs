use std::collections::HashMap;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::api::types::{BodyId, ConnectionId};
use crate::core::registry::BodyRegistry;
use crate::error::{DesyncReason, TorqueError};
use crate::math::Pose;
use crate::sync::codec::{SyncMessage, SyncSnapshot};

/// Client reconciliation tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Positional errors up to this distance snap immediately.
    pub snap_threshold: f32,
    /// Larger corrections blend over this many seconds.
    pub blend_window: f32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            snap_threshold: 0.25,
            blend_window: 0.1,
        }
    }
}

/// An in-progress correction from a predicted pose to the authoritative one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrectionBlend {
    pub start: Pose,
    pub elapsed: f32,
    pub window: f32,
}

/// What the client last heard from the server about one body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionState {
    pub authoritative: Pose,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    pub sequence: u32,
    /// Seconds since the authoritative state arrived.
    pub age: f32,
    pub blend: Option<CorrectionBlend>,
}

impl PredictionState {
    /// Authoritative pose carried forward by its velocity.
    pub fn extrapolated(&self) -> Pose {
        let spin = Quat::from_scaled_axis(self.angular_velocity * self.age);
        Pose::new(
            self.authoritative.position + self.linear_velocity * self.age,
            (spin * self.authoritative.orientation).normalize(),
        )
    }
}

/// Summary of one applied snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Applied {
    pub sequence: u32,
    pub updated: Vec<BodyId>,
    pub removed: Vec<BodyId>,
    /// Records skipped because the body is not known locally.
    pub unknown: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    Applied(Applied),
    /// Same sequence as the last applied snapshot. Nothing changed.
    Duplicate(u32),
    /// Snapshot dropped. Send `resync` to the server.
    Desync {
        error: TorqueError,
        resync: SyncMessage,
    },
    /// A message kind the client does not act on.
    Ignored,
}

/// Client side of the synchronization protocol.
pub struct ClientSync {
    server: ConnectionId,
    config: ReconcileConfig,
    last_applied: Option<u32>,
    predictions: HashMap<BodyId, PredictionState>,
    unknown_records: u64,
}

impl ClientSync {
    pub fn new(server: ConnectionId, config: ReconcileConfig) -> Self {
        Self {
            server,
            config,
            last_applied: None,
            predictions: HashMap::new(),
            unknown_records: 0,
        }
    }

    pub fn server(&self) -> ConnectionId {
        self.server
    }

    pub fn last_applied(&self) -> Option<u32> {
        self.last_applied
    }

    pub fn unknown_records(&self) -> u64 {
        self.unknown_records
    }

    pub fn prediction(&self, id: BodyId) -> Option<&PredictionState> {
        self.predictions.get(&id)
    }

    pub fn resync_request(&self) -> SyncMessage {
        SyncMessage::ResyncRequest {
            last_applied: self.last_applied.unwrap_or(0),
        }
    }

    fn desync(&self, reason: DesyncReason) -> Received {
        let error = TorqueError::ProtocolDesync {
            connection: self.server,
            reason,
        };
        log::warn!("{}", error);
        Received::Desync {
            error,
            resync: self.resync_request(),
        }
    }

    /// Decode and apply bytes from the server.
    pub fn receive(&mut self, bytes: &[u8], registry: &mut BodyRegistry) -> Received {
        match SyncMessage::decode(bytes) {
            Ok(SyncMessage::Snapshot(snapshot)) => self.apply(&snapshot, registry),
            Ok(SyncMessage::ResyncRequest { .. }) => {
                log::debug!("client ignored a resync request from {}", self.server);
                Received::Ignored
            }
            Err(err) => self.desync(DesyncReason::Malformed(err)),
        }
    }

    pub fn apply(&mut self, snapshot: &SyncSnapshot, registry: &mut BodyRegistry) -> Received {
        if let Some(last) = self.last_applied {
            if snapshot.sequence == last {
                return Received::Duplicate(last);
            }
            if snapshot.sequence < last {
                return self.desync(DesyncReason::SequenceRegression {
                    received: snapshot.sequence,
                    last_applied: last,
                });
            }
        }

        let mut applied = Applied {
            sequence: snapshot.sequence,
            ..Applied::default()
        };
        for record in &snapshot.records {
            let Ok(body) = registry.body_mut(record.id) else {
                applied.unknown += 1;
                continue;
            };
            let authoritative = record.state.pose();
            body.linear_velocity = record.state.linear_velocity();
            body.angular_velocity = record.state.angular_velocity();
            let error = body.pose.position.distance(authoritative.position);
            let blend = if error <= self.config.snap_threshold {
                body.pose = authoritative;
                None
            } else {
                Some(CorrectionBlend {
                    start: body.pose,
                    elapsed: 0.0,
                    window: self.config.blend_window,
                })
            };
            body.wake();
            self.predictions.insert(
                record.id,
                PredictionState {
                    authoritative,
                    linear_velocity: body.linear_velocity,
                    angular_velocity: body.angular_velocity,
                    sequence: snapshot.sequence,
                    age: 0.0,
                    blend,
                },
            );
            applied.updated.push(record.id);
        }

        for &id in &snapshot.removed {
            self.predictions.remove(&id);
            if registry.destroy(id).is_ok() {
                applied.removed.push(id);
            }
        }

        if applied.unknown > 0 {
            log::debug!("skipped {} record(s) for unknown bodies", applied.unknown);
        }
        self.unknown_records += applied.unknown as u64;
        self.last_applied = Some(snapshot.sequence);
        Received::Applied(applied)
    }

    /// Advance correction blends by `dt` seconds. Call after the local step.
    pub fn advance(&mut self, dt: f32, registry: &mut BodyRegistry) {
        self.predictions.retain(|id, _| registry.contains(*id));
        for (&id, prediction) in self.predictions.iter_mut() {
            prediction.age += dt;
            let Some(blend) = prediction.blend.as_mut() else {
                continue;
            };
            blend.elapsed += dt;
            let done = blend.elapsed >= blend.window - 1e-6;
            let f = if done { 1.0 } else { blend.elapsed / blend.window };
            let start = blend.start;
            let target = prediction.extrapolated();
            if let Ok(body) = registry.body_mut(id) {
                body.pose = start.lerp(&target, f);
            }
            if done {
                prediction.blend = None;
            }
        }
    }
}
