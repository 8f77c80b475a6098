use crate::health::types::{HealthConfig, HealthReport, HealthStatus};
use crate::network::Transport;
use crate::node::NodeHandle;
use crate::registry::NodeRegistry;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

struct CachedReport {
    taken_at: Duration,
    report: HealthReport,
}

/// Liveness view of every registered node
pub struct HealthMonitor {
    registry: Arc<NodeRegistry>,
    transport: Arc<Transport>,
    config: HealthConfig,
    cache: Mutex<Option<CachedReport>>,
}

impl HealthMonitor {
    pub fn new(registry: Arc<NodeRegistry>, transport: Arc<Transport>, config: HealthConfig) -> Self {
        Self {
            registry,
            transport,
            config,
            cache: Mutex::new(None),
        }
    }

    /// Probe every node concurrently and refresh the cache.
    /// Individual probe failures only mark that node dead.
    pub async fn broadcast(&self) -> HealthReport {
        let nodes = self.registry.nodes();
        let concurrency = num_cpus::get().max(1);

        let report: HealthReport = stream::iter(nodes)
            .map(|node| async move {
                let status = self.check(&node).await;
                (node.node_id().to_string(), status)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let alive = report.values().filter(|s| s.is_alive()).count();
        tracing::info!("health broadcast: {}/{} nodes alive", alive, report.len());
        crate::metrics::set_alive_nodes(alive);

        *self.cache.lock() = Some(CachedReport {
            taken_at: self.transport.clock().now(),
            report: report.clone(),
        });
        report
    }

    async fn check(&self, node: &NodeHandle) -> HealthStatus {
        if node.is_stopped() {
            tracing::debug!("{} is stopped", node.node_id());
            return HealthStatus::Dead;
        }

        let gateway = self.registry.gateway_address();
        match self
            .transport
            .probe(&gateway, node.address(), self.config.probe_timeout)
            .await
        {
            Ok(rtt) => {
                tracing::debug!("{} alive (rtt {:?})", node.node_id(), rtt);
                HealthStatus::Alive
            }
            Err(e) => {
                tracing::warn!("{} failed health check: {}", node.node_id(), e);
                HealthStatus::Dead
            }
        }
    }

    /// Cached report if still fresh, otherwise a new broadcast
    pub async fn report(&self) -> HealthReport {
        if let Some(report) = self.fresh_report() {
            return report;
        }
        self.broadcast().await
    }

    /// Alive node ids in registration order. A node that has stopped since
    /// the cached broadcast is left out without waiting for the cache to
    /// expire.
    pub async fn live_nodes(&self) -> Vec<String> {
        let report = self.report().await;
        self.registry
            .nodes()
            .into_iter()
            .filter(|node| !node.is_stopped())
            .map(|node| node.node_id().to_string())
            .filter(|id| report.get(id).is_some_and(HealthStatus::is_alive))
            .collect()
    }

    /// True when the node is stopped or the cached report says it is dead;
    /// never probes
    pub fn is_known_dead(&self, node_id: &str) -> bool {
        if self.registry.get(node_id).is_some_and(|node| node.is_stopped()) {
            return true;
        }
        self.fresh_report()
            .and_then(|report| report.get(node_id).copied())
            .is_some_and(|status| !status.is_alive())
    }

    /// Latest broadcast result regardless of age
    pub fn last_report(&self) -> Option<HealthReport> {
        self.cache.lock().as_ref().map(|cached| cached.report.clone())
    }

    /// Forget the cached report so the next query probes again
    pub fn invalidate(&self) {
        *self.cache.lock() = None;
    }

    fn fresh_report(&self) -> Option<HealthReport> {
        let now = self.transport.clock().now();
        let cache = self.cache.lock();
        cache
            .as_ref()
            .filter(|cached| now.saturating_sub(cached.taken_at) < self.config.cache_ttl)
            .map(|cached| cached.report.clone())
    }
}
