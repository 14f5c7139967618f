use serde::{Deserialize, Serialize};

use crate::bus::queue::DEFAULT_BUS_CAPACITY;
use crate::physics::integrator::IntegratorConfig;
use crate::sync::client::ReconcileConfig;

/// Configuration for one world session. Every section and field has a default,
/// so a partial JSON document is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub integrator: IntegratorConfig,
    /// Client-side correction tuning. Ignored by servers.
    pub reconcile: ReconcileConfig,
    /// Capacity of each event bus (default: 1024).
    pub bus_capacity: usize,
    /// Maximum body records per snapshot (default: 512). The rest go out next tick.
    pub max_records: usize,
    /// Packets the built-in outbox holds before dropping the oldest (default: 1024).
    pub outbox_capacity: usize,
    /// Ticks `advance` may run for one frame before dropping the backlog (default: 10).
    pub max_steps_per_frame: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            integrator: IntegratorConfig::default(),
            reconcile: ReconcileConfig::default(),
            bus_capacity: DEFAULT_BUS_CAPACITY,
            max_records: 512,
            outbox_capacity: 1024,
            max_steps_per_frame: 10,
        }
    }
}

impl SessionConfig {
    /// Parse a config from a JSON string. A non-positive or non-finite
    /// `integrator.dt` is rejected.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let config: Self = serde_json::from_str(json)?;
        let dt = config.integrator.dt;
        if !dt.is_finite() || dt <= 0.0 {
            return Err(<serde_json::Error as serde::de::Error>::custom(format!(
                "integrator.dt must be positive and finite, got {}",
                dt
            )));
        }
        Ok(config)
    }

    pub fn with_integrator(mut self, integrator: IntegratorConfig) -> Self {
        self.integrator = integrator;
        self
    }

    pub fn with_bus_capacity(mut self, capacity: usize) -> Self {
        self.bus_capacity = capacity;
        self
    }

    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records;
        self
    }

    pub fn with_outbox_capacity(mut self, capacity: usize) -> Self {
        self.outbox_capacity = capacity;
        self
    }
}
