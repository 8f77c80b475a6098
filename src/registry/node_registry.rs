use crate::node::{NodeError, NodeHandle, NodeResult};
use parking_lot::RwLock;

/// First and last host octets handed out to nodes. `.1` is the client.
const FIRST_HOST: u8 = 2;
const LAST_HOST: u8 = 254;

struct RegistryInner {
    nodes: Vec<NodeHandle>,
    next_host: u16,
}

/// All nodes of one simulated /24 network, in registration order
pub struct NodeRegistry {
    network_name: String,
    prefix: String,
    inner: RwLock<RegistryInner>,
}

impl NodeRegistry {
    /// `prefix` is the first three octets, e.g. `192.168.1`
    pub fn new(network_name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            network_name: network_name.into(),
            prefix: prefix.into(),
            inner: RwLock::new(RegistryInner {
                nodes: Vec::new(),
                next_host: FIRST_HOST as u16,
            }),
        }
    }

    pub fn network_name(&self) -> &str {
        &self.network_name
    }

    /// CIDR of the simulated network
    pub fn subnet(&self) -> String {
        format!("{}.0/24", self.prefix)
    }

    /// Endpoint used by the client and the health monitor
    pub fn gateway_address(&self) -> String {
        format!("{}.1", self.prefix)
    }

    /// Reserve the next free host address
    pub fn assign_address(&self) -> NodeResult<String> {
        let mut inner = self.inner.write();
        if inner.next_host > LAST_HOST as u16 {
            return Err(NodeError::NetworkFull(self.subnet()));
        }
        let address = format!("{}.{}", self.prefix, inner.next_host);
        inner.next_host += 1;
        Ok(address)
    }

    pub fn register(&self, handle: NodeHandle) -> NodeResult<()> {
        let mut inner = self.inner.write();
        if inner
            .nodes
            .iter()
            .any(|n| n.node_id() == handle.node_id() || n.address() == handle.address())
        {
            return Err(NodeError::DuplicateNode(handle.node_id().to_string()));
        }
        tracing::info!(
            "registered {} at {} on {}",
            handle.node_id(),
            handle.address(),
            self.network_name
        );
        inner.nodes.push(handle);
        Ok(())
    }

    pub fn get(&self, node_id: &str) -> Option<NodeHandle> {
        self.inner
            .read()
            .nodes
            .iter()
            .find(|n| n.node_id() == node_id)
            .cloned()
    }

    pub fn lookup(&self, node_id: &str) -> NodeResult<NodeHandle> {
        self.get(node_id)
            .ok_or_else(|| NodeError::UnknownNode(node_id.to_string()))
    }

    pub fn by_address(&self, address: &str) -> Option<NodeHandle> {
        self.inner
            .read()
            .nodes
            .iter()
            .find(|n| n.address() == address)
            .cloned()
    }

    /// Registered nodes plus the gateway can receive packets
    pub fn is_routable(&self, address: &str) -> bool {
        address == self.gateway_address() || self.by_address(address).is_some()
    }

    /// Every node, in registration order
    pub fn nodes(&self) -> Vec<NodeHandle> {
        self.inner.read().nodes.clone()
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.inner
            .read()
            .nodes
            .iter()
            .map(|n| n.node_id().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().nodes.is_empty()
    }
}
