use crate::node::NodeState;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag, checked between chunk operations
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Storage figures for one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStorage {
    pub capacity_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
    pub utilization_percent: f64,
    pub segments: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyNode {
    pub node_id: String,
    pub address: String,
    pub state: NodeState,
    /// From the latest health broadcast; a stopped node is never alive
    pub alive: bool,
    pub segments: usize,
    pub used_bytes: u64,
    pub peers: Vec<String>,
}

/// Shape of the simulated network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    pub network_name: String,
    pub subnet: String,
    pub gateway: String,
    pub node_count: usize,
    pub nodes: Vec<TopologyNode>,
}

impl Topology {
    /// Number of distinct peer links
    pub fn link_count(&self) -> usize {
        self.nodes.iter().map(|n| n.peers.len()).sum::<usize>() / 2
    }
}

/// Where one segment copy lives
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentLocation {
    pub node_id: String,
    pub segment_id: String,
}

/// Differences between the metadata index and what nodes actually hold
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Referenced by metadata, not held by the node
    pub missing: Vec<SegmentLocation>,
    /// Held by a node, referenced by no record
    pub orphaned: Vec<SegmentLocation>,
    /// Nodes whose worker could not be asked
    pub unreachable: Vec<String>,
}

impl ReconcileReport {
    pub fn is_consistent(&self) -> bool {
        self.missing.is_empty() && self.orphaned.is_empty() && self.unreachable.is_empty()
    }
}
