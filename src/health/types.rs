use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Alive,
    Dead,
}

impl HealthStatus {
    pub fn is_alive(&self) -> bool {
        matches!(self, HealthStatus::Alive)
    }
}

/// Node id -> status from the latest broadcast
pub type HealthReport = BTreeMap<String, HealthStatus>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// A node that has not answered within this window is dead
    pub probe_timeout: Duration,

    /// How long a broadcast result may be reused for placement decisions
    pub cache_ttl: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(1),
            cache_ttl: Duration::from_secs(2),
        }
    }
}
