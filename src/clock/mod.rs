//! Time source used by the transport and health monitor
//!
//! Delivery delays are computed, not measured, so every component that
//! waits on the simulated wire goes through a [`Clock`]. Production-style
//! runs use [`SystemClock`]; tests inject a [`VirtualClock`] and never
//! block on wall-clock time.

pub mod system;
pub mod virtual_time;

pub use system::SystemClock;
pub use virtual_time::VirtualClock;

use futures::future::BoxFuture;
use std::time::Duration;

pub trait Clock: Send + Sync + 'static {
    /// Time elapsed since the clock was created
    fn now(&self) -> Duration;

    /// Suspend the caller for `duration` of clock time
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}
