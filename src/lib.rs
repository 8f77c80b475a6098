//! Simulated distributed file storage
//!
//! Files are split into fixed-size segments, placed round-robin (with
//! optional replication) on a set of storage nodes, and moved over a
//! simulated lossy, bandwidth-limited network. A durable metadata index
//! maps every file to the nodes holding its segments.

pub mod clock;
pub mod coordinator;
pub mod health;
pub mod metadata;
pub mod metrics;
pub mod network;
pub mod node;
pub mod planner;
pub mod registry;
pub mod storage;

pub use clock::{Clock, SystemClock, VirtualClock};
pub use coordinator::{CancelToken, FabricConfig, FabricError, FabricResult, StorageFabric};
