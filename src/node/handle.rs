use crate::network::NetworkPacket;
use crate::node::error::{NodeError, NodeResult};
use crate::node::types::{NodeCommand, NodeInfo, NodeState};
use crate::storage::SegmentEntry;
use tokio::sync::{mpsc, oneshot, watch};

/// Cheap, cloneable reference to a running node worker
#[derive(Debug, Clone)]
pub struct NodeHandle {
    node_id: String,
    address: String,
    mailbox: mpsc::Sender<NodeCommand>,
    info: watch::Receiver<NodeInfo>,
}

impl NodeHandle {
    pub(crate) fn new(
        node_id: String,
        address: String,
        mailbox: mpsc::Sender<NodeCommand>,
        info: watch::Receiver<NodeInfo>,
    ) -> Self {
        Self {
            node_id,
            address,
            mailbox,
            info,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Latest published snapshot
    pub fn info(&self) -> NodeInfo {
        self.info.borrow().clone()
    }

    pub fn state(&self) -> NodeState {
        self.info.borrow().state
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == NodeState::Stopped
    }

    /// Hand a packet that already crossed the wire to the worker
    pub async fn deliver(
        &self,
        packet: NetworkPacket,
        reply: Option<oneshot::Sender<NetworkPacket>>,
    ) -> NodeResult<()> {
        self.send(NodeCommand::Packet { packet, reply }).await
    }

    pub async fn add_peer(&self, node_id: &str, address: &str) -> NodeResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(NodeCommand::AddPeer {
            node_id: node_id.to_string(),
            address: address.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| self.unreachable())
    }

    pub async fn list_segments(&self) -> NodeResult<Vec<SegmentEntry>> {
        let (reply, rx) = oneshot::channel();
        self.send(NodeCommand::ListSegments { reply }).await?;
        rx.await.map_err(|_| self.unreachable())
    }

    pub async fn stop(&self) -> NodeResult<NodeState> {
        let (reply, rx) = oneshot::channel();
        self.send(NodeCommand::Stop { reply }).await?;
        rx.await.map_err(|_| self.unreachable())
    }

    pub async fn restart(&self) -> NodeResult<NodeState> {
        let (reply, rx) = oneshot::channel();
        self.send(NodeCommand::Restart { reply }).await?;
        rx.await.map_err(|_| self.unreachable())
    }

    /// Stop the worker task for good
    pub async fn shutdown(&self) -> NodeResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(NodeCommand::Shutdown { reply }).await?;
        rx.await.map_err(|_| self.unreachable())
    }

    async fn send(&self, command: NodeCommand) -> NodeResult<()> {
        self.mailbox
            .send(command)
            .await
            .map_err(|_| self.unreachable())
    }

    fn unreachable(&self) -> NodeError {
        NodeError::NodeUnreachable(self.node_id.clone())
    }
}
