//! Node worker task
//!
//! Each node runs as one tokio task that exclusively owns its
//! [`SegmentStore`] and state machine, and consumes a mailbox of
//! packets and admin commands in arrival order.

use crate::network::{NetworkPacket, PacketKind};
use crate::node::handle::NodeHandle;
use crate::node::state_machine::NodeStateMachine;
use crate::node::types::{
    NodeCommand, NodeEvent, NodeInfo, NodeRequest, NodeResponse, NodeState, RemoteFailure,
};
use crate::storage::{SegmentStore, StorageError, StorageResult};
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio::sync::{mpsc, oneshot, watch};

const MAILBOX_CAPACITY: usize = 256;

/// Sequenced connections a node tracks at once; the oldest is forgotten
/// when a new SYN would exceed it
pub(crate) const MAX_OPEN_CONNECTIONS: usize = 64;

pub struct NodeWorker {
    node_id: String,
    address: String,
    store: SegmentStore,
    machine: NodeStateMachine,
    peers: BTreeMap<String, String>,
    /// Next expected DATA seq per connection, keyed by source address
    /// and the ack number echoing our SYN_ACK seq
    inbound_seq: HashMap<(String, u64), u64>,
    /// Open connections, oldest first
    opened: VecDeque<(String, u64)>,
    info_tx: watch::Sender<NodeInfo>,
}

impl NodeWorker {
    /// Start the worker task and return a handle to it
    pub fn spawn(
        node_id: impl Into<String>,
        address: impl Into<String>,
        store: SegmentStore,
    ) -> NodeHandle {
        let node_id = node_id.into();
        let address = address.into();
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);

        let machine = NodeStateMachine::new();
        let info = NodeInfo {
            node_id: node_id.clone(),
            address: address.clone(),
            state: machine.current_state(),
            capacity_bytes: store.capacity_bytes(),
            used_bytes: store.used_bytes(),
            segments: store.entries().count(),
            open_connections: 0,
            peers: BTreeMap::new(),
        };
        let (info_tx, info_rx) = watch::channel(info);

        let worker = NodeWorker {
            node_id: node_id.clone(),
            address: address.clone(),
            store,
            machine,
            peers: BTreeMap::new(),
            inbound_seq: HashMap::new(),
            opened: VecDeque::new(),
            info_tx,
        };
        tokio::spawn(worker.run(rx));

        tracing::info!("node {} online at {}", node_id, address);
        NodeHandle::new(node_id, address, tx, info_rx)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<NodeCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                NodeCommand::Packet { packet, reply } => self.handle_packet(packet, reply).await,
                NodeCommand::AddPeer {
                    node_id,
                    address,
                    reply,
                } => {
                    self.peers.insert(node_id, address);
                    self.publish();
                    let _ = reply.send(());
                }
                NodeCommand::ListSegments { reply } => {
                    let _ = reply.send(self.store.entries().cloned().collect());
                }
                NodeCommand::Stop { reply } => {
                    self.apply(NodeEvent::Shutdown);
                    self.inbound_seq.clear();
                    self.opened.clear();
                    tracing::info!("node {} stopped", self.node_id);
                    let _ = reply.send(self.machine.current_state());
                }
                NodeCommand::Restart { reply } => {
                    if self.machine.is_stopped() {
                        self.apply(NodeEvent::Restart);
                        tracing::info!("node {} restarted", self.node_id);
                    }
                    let _ = reply.send(self.machine.current_state());
                }
                NodeCommand::Shutdown { reply } => {
                    self.apply(NodeEvent::Shutdown);
                    let _ = reply.send(());
                    break;
                }
            }
        }

        if !self.machine.is_stopped() {
            self.apply(NodeEvent::Shutdown);
        }
        tracing::info!("node {} worker exited", self.node_id);
    }

    async fn handle_packet(
        &mut self,
        packet: NetworkPacket,
        reply: Option<oneshot::Sender<NetworkPacket>>,
    ) {
        if self.machine.is_stopped() {
            // Dropping `reply` tells the sender nobody is listening
            tracing::debug!("node {} is stopped, dropping {}", self.node_id, packet);
            return;
        }
        if packet.destination != self.address {
            tracing::warn!("node {} got misrouted {}", self.node_id, packet);
            return;
        }

        let answer = match packet.kind {
            PacketKind::HealthCheck => Some(packet.reply(PacketKind::Ack, Bytes::new())),
            PacketKind::Syn => {
                let initial_seq = u64::from(rand::random::<u32>());
                self.open_connection((packet.source.clone(), initial_seq + 1), packet.seq + 1);
                let mut syn_ack = packet.reply(PacketKind::SynAck, Bytes::new());
                syn_ack.seq = initial_seq;
                Some(syn_ack)
            }
            PacketKind::Ack | PacketKind::SynAck => None,
            PacketKind::Fin => {
                self.close_connection(&(packet.source.clone(), packet.ack));
                Some(packet.reply(PacketKind::Ack, Bytes::new()))
            }
            PacketKind::Data => Some(self.handle_data(&packet).await),
        };

        if let (Some(answer), Some(reply)) = (answer, reply) {
            let _ = reply.send(answer);
        }
    }

    async fn handle_data(&mut self, packet: &NetworkPacket) -> NetworkPacket {
        let connection = (packet.source.clone(), packet.ack);
        if let Some(expected) = self.inbound_seq.get_mut(&connection) {
            if packet.seq != *expected {
                tracing::warn!(
                    "node {}: out-of-order packet from {} (expected seq {}, got {})",
                    self.node_id,
                    packet.source,
                    expected,
                    packet.seq
                );
                let failure = NodeResponse::Failed(RemoteFailure::OutOfOrder {
                    expected: *expected,
                    received: packet.seq,
                });
                return answer(packet, PacketKind::Ack, &failure);
            }
            *expected += 1;
        }

        let response = match bincode::deserialize::<NodeRequest>(&packet.payload) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => NodeResponse::Failed(RemoteFailure::Malformed(e.to_string())),
        };

        let kind = match response {
            NodeResponse::Segment { .. } => PacketKind::Data,
            _ => PacketKind::Ack,
        };
        answer(packet, kind, &response)
    }

    /// Run one storage operation through READY -> WAITING -> RUNNING -> READY
    pub(crate) async fn handle_request(&mut self, request: NodeRequest) -> NodeResponse {
        if !self.apply(NodeEvent::RequestReceived) {
            return NodeResponse::Failed(RemoteFailure::Io(format!(
                "node {} is {}",
                self.node_id,
                self.machine.current_state()
            )));
        }

        let operation = request.name();
        let outcome: StorageResult<NodeResponse> = match request {
            NodeRequest::Store { segment } => {
                let size = segment.size_bytes;
                self.store.store(&segment).await.map(|()| {
                    crate::metrics::record_segment_stored(&self.node_id, size);
                    NodeResponse::Stored {
                        segment_id: segment.segment_id,
                    }
                })
            }
            NodeRequest::Fetch { segment_id } => {
                self.store.retrieve(&segment_id).await.map(|segment| {
                    crate::metrics::record_segment_fetched(&self.node_id, segment.size_bytes);
                    NodeResponse::Segment { segment }
                })
            }
            NodeRequest::Purge { segment_id } => {
                self.store.remove(&segment_id).await.map(|entry| {
                    crate::metrics::record_segment_purged(&self.node_id);
                    NodeResponse::Purged {
                        segment_id,
                        existed: entry.is_some(),
                    }
                })
            }
        };

        let response = match outcome {
            Ok(response) => {
                self.apply(NodeEvent::IoCompleted);
                self.apply(NodeEvent::OperationCompleted);
                response
            }
            Err(StorageError::Io(e)) => {
                tracing::error!("node {}: {} failed with I/O error: {}", self.node_id, operation, e);
                let failure = RemoteFailure::Io(e.to_string());
                self.apply(NodeEvent::Fault {
                    reason: e.to_string(),
                });
                NodeResponse::Failed(failure)
            }
            Err(e) => {
                tracing::debug!("node {}: {} rejected: {}", self.node_id, operation, e);
                self.apply(NodeEvent::IoCompleted);
                self.apply(NodeEvent::OperationCompleted);
                NodeResponse::Failed(RemoteFailure::from(&e))
            }
        };

        crate::metrics::set_node_storage(&self.node_id, self.store.used_bytes());
        response
    }

    /// Apply a transition and publish the result; false if it was rejected
    fn apply(&mut self, event: NodeEvent) -> bool {
        match self.machine.transition(event) {
            Ok(_) => {
                self.publish();
                true
            }
            Err(e) => {
                tracing::error!("node {}: {}", self.node_id, e);
                false
            }
        }
    }

    fn open_connection(&mut self, key: (String, u64), next_seq: u64) {
        self.inbound_seq.insert(key.clone(), next_seq);
        self.opened.push_back(key);
        while self.opened.len() > MAX_OPEN_CONNECTIONS {
            if let Some(oldest) = self.opened.pop_front() {
                tracing::debug!(
                    "node {} forgetting idle connection from {}",
                    self.node_id,
                    oldest.0
                );
                self.inbound_seq.remove(&oldest);
            }
        }
        self.publish();
    }

    fn close_connection(&mut self, key: &(String, u64)) {
        if self.inbound_seq.remove(key).is_some() {
            self.opened.retain(|open| open != key);
            self.publish();
        }
    }

    fn publish(&self) {
        let info = NodeInfo {
            node_id: self.node_id.clone(),
            address: self.address.clone(),
            state: self.machine.current_state(),
            capacity_bytes: self.store.capacity_bytes(),
            used_bytes: self.store.used_bytes(),
            segments: self.store.entries().count(),
            open_connections: self.inbound_seq.len(),
            peers: self.peers.clone(),
        };
        self.info_tx.send_replace(info);
    }
}

fn answer(packet: &NetworkPacket, kind: PacketKind, response: &NodeResponse) -> NetworkPacket {
    let payload = match bincode::serialize(response) {
        Ok(raw) => Bytes::from(raw),
        Err(e) => {
            tracing::error!("failed to encode node response: {}", e);
            Bytes::new()
        }
    };
    packet.reply(kind, payload)
}
