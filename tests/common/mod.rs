//! Shared fixtures for fabric integration tests

#![allow(dead_code)]

use chunkmesh::clock::{Clock, VirtualClock};
use chunkmesh::network::TransportConfig;
use chunkmesh::{CancelToken, FabricConfig, StorageFabric};
use futures::future::BoxFuture;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const KB: usize = 1024;
pub const MB: usize = 1024 * 1024;

/// Five nodes, 64 KB/s, no loss
pub fn lossless_config(data_dir: &Path) -> FabricConfig {
    FabricConfig::new(data_dir)
        .with_nodes(5)
        .with_capacity_per_node(64 * MB as u64)
        .with_transport(TransportConfig::reliable().with_seed(7))
}

pub async fn start(config: FabricConfig) -> (StorageFabric, VirtualClock) {
    let clock = VirtualClock::new();
    let fabric = StorageFabric::start_with_clock(config, Arc::new(clock.clone()))
        .await
        .unwrap();
    (fabric, clock)
}

/// Deterministic, non-repeating test payload
pub fn payload(size: usize, salt: u8) -> Vec<u8> {
    (0..size)
        .map(|i| ((i * 31 + salt as usize) % 251) as u8)
        .collect()
}

/// Virtual clock that fires a cancel token once simulated time passes
/// a deadline
pub struct CancelAt {
    inner: VirtualClock,
    deadline: Duration,
    token: CancelToken,
}

impl CancelAt {
    pub fn new(inner: VirtualClock, deadline: Duration, token: CancelToken) -> Self {
        Self {
            inner,
            deadline,
            token,
        }
    }
}

impl Clock for CancelAt {
    fn now(&self) -> Duration {
        self.inner.now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        let sleep = self.inner.sleep(duration);
        if self.inner.now() >= self.deadline {
            self.token.cancel();
        }
        sleep
    }
}
