mod config;
mod coordinator;
mod error;
mod types;

pub use config::FabricConfig;
pub use coordinator::StorageFabric;
pub use error::{FabricError, FabricResult};
pub use types::{
    CancelToken, NodeStorage, ReconcileReport, SegmentLocation, Topology, TopologyNode,
};
