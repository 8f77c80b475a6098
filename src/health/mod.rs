//! Node liveness via HEALTH_CHECK broadcasts

mod monitor;
mod types;

pub use monitor::HealthMonitor;
pub use types::{HealthConfig, HealthReport, HealthStatus};
