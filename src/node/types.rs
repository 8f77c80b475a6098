use crate::network::NetworkPacket;
use crate::storage::{Segment, SegmentEntry, StorageError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    /// Idle and accepting requests
    Ready,
    /// Request accepted, I/O in flight
    Waiting,
    /// I/O finished, completing the operation
    Running,
    /// Terminal until restarted; drops every packet
    Stopped,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NodeState::Ready => "READY",
            NodeState::Waiting => "WAITING",
            NodeState::Running => "RUNNING",
            NodeState::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    RequestReceived,
    IoCompleted,
    OperationCompleted,
    Shutdown,
    Fault { reason: String },
    Restart,
}

/// Published view of a node, refreshed after every state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub address: String,
    pub state: NodeState,
    pub capacity_bytes: u64,
    pub used_bytes: u64,
    pub segments: usize,
    /// Sequenced connections currently tracked
    pub open_connections: usize,
    /// Peer node id -> address
    pub peers: BTreeMap<String, String>,
}

impl NodeInfo {
    pub fn available_bytes(&self) -> u64 {
        self.capacity_bytes.saturating_sub(self.used_bytes)
    }

    pub fn utilization(&self) -> f64 {
        if self.capacity_bytes == 0 {
            0.0
        } else {
            self.used_bytes as f64 / self.capacity_bytes as f64
        }
    }
}

/// Operations carried in DATA packets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeRequest {
    Store { segment: Segment },
    Fetch { segment_id: String },
    Purge { segment_id: String },
}

impl NodeRequest {
    pub fn name(&self) -> &'static str {
        match self {
            NodeRequest::Store { .. } => "store",
            NodeRequest::Fetch { .. } => "fetch",
            NodeRequest::Purge { .. } => "purge",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeResponse {
    Stored { segment_id: String },
    Segment { segment: Segment },
    Purged { segment_id: String, existed: bool },
    Failed(RemoteFailure),
}

/// A storage or protocol error as it crosses the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteFailure {
    InsufficientSpace { needed: u64, available: u64 },
    SegmentNotFound(String),
    CorruptedSegment(String),
    OutOfOrder { expected: u64, received: u64 },
    Malformed(String),
    Io(String),
}

impl From<&StorageError> for RemoteFailure {
    fn from(err: &StorageError) -> Self {
        match err {
            StorageError::InsufficientSpace { needed, available } => {
                RemoteFailure::InsufficientSpace {
                    needed: *needed,
                    available: *available,
                }
            }
            StorageError::SegmentNotFound(id) => RemoteFailure::SegmentNotFound(id.clone()),
            StorageError::CorruptedSegment(id) => RemoteFailure::CorruptedSegment(id.clone()),
            other => RemoteFailure::Io(other.to_string()),
        }
    }
}

impl std::fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteFailure::InsufficientSpace { needed, available } => {
                write!(f, "insufficient space: need {needed}, {available} available")
            }
            RemoteFailure::SegmentNotFound(id) => write!(f, "segment not found: {id}"),
            RemoteFailure::CorruptedSegment(id) => write!(f, "corrupted segment: {id}"),
            RemoteFailure::OutOfOrder { expected, received } => {
                write!(f, "out of order: expected seq {expected}, received {received}")
            }
            RemoteFailure::Malformed(reason) => write!(f, "malformed request: {reason}"),
            RemoteFailure::Io(reason) => write!(f, "io: {reason}"),
        }
    }
}

/// Mailbox messages consumed by a node worker
#[derive(Debug)]
pub enum NodeCommand {
    Packet {
        packet: NetworkPacket,
        reply: Option<oneshot::Sender<NetworkPacket>>,
    },
    AddPeer {
        node_id: String,
        address: String,
        reply: oneshot::Sender<()>,
    },
    ListSegments {
        reply: oneshot::Sender<Vec<SegmentEntry>>,
    },
    Stop {
        reply: oneshot::Sender<NodeState>,
    },
    Restart {
        reply: oneshot::Sender<NodeState>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}
