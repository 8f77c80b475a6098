use super::Clock;
use futures::future::{self, BoxFuture, FutureExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Discrete clock for deterministic tests.
///
/// `sleep` advances virtual time by the requested amount and resolves
/// immediately, so a simulated 4 second transfer finishes in microseconds
/// of real time. Concurrent sleepers accumulate: two parallel 1s sleeps
/// advance the clock by 2s.
#[derive(Debug, Clone, Default)]
pub struct VirtualClock {
    elapsed_nanos: Arc<AtomicU64>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move virtual time forward without anyone sleeping
    pub fn advance(&self, duration: Duration) {
        self.elapsed_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.elapsed_nanos.load(Ordering::SeqCst))
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.advance(duration);
        future::ready(()).boxed()
    }
}
