use crate::clock::{Clock, SystemClock};
use crate::coordinator::config::FabricConfig;
use crate::coordinator::error::{FabricError, FabricResult};
use crate::coordinator::types::{
    CancelToken, NodeStorage, ReconcileReport, SegmentLocation, Topology, TopologyNode,
};
use crate::health::{HealthMonitor, HealthReport};
use crate::metadata::{file_id_for, FileRecord, MetadataError, MetadataIndex};
use crate::metrics::{Operation, OperationTimer};
use crate::network::{Connection, NetworkError, Transport, TransportStats};
use crate::node::{NodeError, NodeInfo, NodeRequest, NodeResponse, NodeState, NodeWorker};
use crate::planner::{DistributionPlanner, PlacementError};
use crate::registry::NodeRegistry;
use crate::storage::{chunk, file_hash, reconstruct, segment_id, Segment, SegmentStore, StorageError};
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Rounds of purge requests sent for an aborted upload
const ROLLBACK_PASSES: u32 = 8;

/// Client-facing entry point: owns the nodes, the simulated network and
/// the metadata index.
pub struct StorageFabric {
    config: FabricConfig,
    clock: Arc<dyn Clock>,
    registry: Arc<NodeRegistry>,
    transport: Arc<Transport>,
    health: Arc<HealthMonitor>,
    planner: DistributionPlanner,
    metadata: RwLock<MetadataIndex>,
}

impl StorageFabric {
    /// Bring up a fabric on wall-clock time
    pub async fn start(config: FabricConfig) -> FabricResult<Self> {
        Self::start_with_clock(config, Arc::new(SystemClock::new())).await
    }

    /// Bring up `config.node_count` nodes, mesh them and load the index.
    /// Segments and metadata left by a previous run are recovered.
    pub async fn start_with_clock(config: FabricConfig, clock: Arc<dyn Clock>) -> FabricResult<Self> {
        config.validate()?;
        crate::metrics::init_metrics();

        tokio::fs::create_dir_all(&config.data_dir)
            .await
            .map_err(StorageError::from)?;

        let registry = Arc::new(NodeRegistry::new(
            config.network_name.clone(),
            config.address_prefix.clone(),
        ));
        for i in 1..=config.node_count {
            let node_id = format!("Node_{:02}", i);
            let address = registry.assign_address()?;
            let store =
                SegmentStore::open(&node_id, config.node_dir(&node_id), config.capacity_per_node)
                    .await?;
            registry.register(NodeWorker::spawn(&node_id, address, store))?;
        }

        // Full mesh
        let nodes = registry.nodes();
        for node in &nodes {
            for peer in nodes.iter().filter(|p| p.node_id() != node.node_id()) {
                node.add_peer(peer.node_id(), peer.address()).await?;
            }
        }

        let metadata = MetadataIndex::open(config.metadata_path()).await?;
        if !metadata.quarantined().is_empty() {
            tracing::warn!(
                "{} metadata records quarantined on load",
                metadata.quarantined().len()
            );
        }

        let transport = Arc::new(Transport::new(
            config.transport.clone(),
            registry.clone(),
            clock.clone(),
        )?);
        let health = Arc::new(HealthMonitor::new(
            registry.clone(),
            transport.clone(),
            config.health.clone(),
        ));
        let planner = DistributionPlanner::new(health.clone());

        tracing::info!(
            "fabric {} up: {} nodes on {}, {} files indexed",
            config.network_name,
            registry.len(),
            registry.subnet(),
            metadata.len()
        );

        Ok(Self {
            config,
            clock,
            registry,
            transport,
            health,
            planner,
            metadata: RwLock::new(metadata),
        })
    }

    pub fn config(&self) -> &FabricConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Upload with the configured default chunk size and replication
    pub async fn upload_with_defaults(
        &self,
        file_bytes: impl Into<Bytes>,
        filename: &str,
    ) -> FabricResult<String> {
        self.upload(
            file_bytes,
            filename,
            self.config.default_chunk_size,
            self.config.default_replication,
        )
        .await
    }

    /// Store a file across the live nodes and return its id.
    /// Uploading identical bytes again returns the existing id.
    pub async fn upload(
        &self,
        file_bytes: impl Into<Bytes>,
        filename: &str,
        chunk_size: usize,
        replication: u32,
    ) -> FabricResult<String> {
        self.upload_with_cancel(file_bytes, filename, chunk_size, replication, &CancelToken::new())
            .await
    }

    /// Upload that stops between chunk sends once `cancel` fires. A
    /// cancelled or failed upload leaves no segments and no record behind.
    pub async fn upload_with_cancel(
        &self,
        file_bytes: impl Into<Bytes>,
        filename: &str,
        chunk_size: usize,
        replication: u32,
        cancel: &CancelToken,
    ) -> FabricResult<String> {
        if chunk_size == 0 {
            return Err(FabricError::InvalidArgument("chunk size must be positive".into()));
        }
        if replication == 0 {
            return Err(PlacementError::ZeroReplication.into());
        }

        let mut timer = OperationTimer::start(Operation::Upload, self.clock.now());
        match self
            .try_upload(file_bytes.into(), filename, chunk_size, replication, cancel, &mut timer)
            .await
        {
            Ok(file_id) => {
                timer.complete(self.clock.now());
                Ok(file_id)
            }
            Err(e) => {
                tracing::warn!("upload of {} failed: {}", filename, e);
                timer.fail(e.kind());
                Err(e)
            }
        }
    }

    async fn try_upload(
        &self,
        file_bytes: Bytes,
        filename: &str,
        chunk_size: usize,
        replication: u32,
        cancel: &CancelToken,
        timer: &mut OperationTimer,
    ) -> FabricResult<String> {
        let started = self.clock.now();
        let total_size = file_bytes.len() as u64;
        let (hash, segments) = chunk(file_bytes, chunk_size)?;
        let file_id = file_id_for(&hash);

        if self.metadata.read().await.contains(&file_id) {
            tracing::info!("{} already stored as {}", filename, file_id);
            return Ok(file_id);
        }

        let placements = self
            .planner
            .plan(segments.len() as u32, replication)
            .await?;
        self.check_capacity(&segments, &placements)?;

        let mut committed = Vec::new();
        let mut sessions = Sessions::new(self);
        let placed = self
            .place_segments(&mut sessions, &segments, &placements, cancel, &mut committed, timer)
            .await;
        sessions.close_all().await;

        if let Err(e) = placed {
            self.rollback(&committed).await;
            return Err(e);
        }

        let record = FileRecord::new(
            filename,
            hash,
            total_size,
            chunk_size as u64,
            &placements,
            replication,
        );

        let mut index = self.metadata.write().await;
        match index.create(record) {
            Ok(()) => {}
            Err(MetadataError::AlreadyExists(_)) => {
                // A concurrent upload of the same bytes committed first
                let keep = locations(index.lookup(&file_id)?);
                drop(index);
                let stray: Vec<SegmentLocation> = committed
                    .into_iter()
                    .filter(|location| !keep.contains(location))
                    .collect();
                self.rollback(&stray).await;
                return Ok(file_id);
            }
            Err(e) => {
                drop(index);
                self.rollback(&committed).await;
                return Err(e.into());
            }
        }

        if let Err(e) = index.persist().await {
            index.discard(&file_id);
            drop(index);
            self.rollback(&committed).await;
            return Err(e.into());
        }
        drop(index);

        tracing::info!(
            "uploaded {} as {}: {} chunks x{} in {:?}",
            filename,
            file_id,
            segments.len(),
            replication,
            self.clock.now().saturating_sub(started)
        );
        Ok(file_id)
    }

    /// Reject up front when any target node lacks room for its share
    fn check_capacity(&self, segments: &[Segment], placements: &[Vec<String>]) -> FabricResult<()> {
        let mut demand: BTreeMap<&str, u64> = BTreeMap::new();
        for (segment, nodes) in segments.iter().zip(placements) {
            for node_id in nodes {
                *demand.entry(node_id.as_str()).or_default() += segment.size_bytes;
            }
        }

        let mut needed = 0;
        let mut available = 0;
        let mut short = false;
        for (node_id, bytes) in demand {
            let free = self.registry.lookup(node_id)?.info().available_bytes();
            needed += bytes;
            available += free;
            if bytes > free {
                tracing::warn!("{} needs {} bytes but has {} free", node_id, bytes, free);
                short = true;
            }
        }

        if short {
            return Err(StorageError::InsufficientSpace { needed, available }.into());
        }
        Ok(())
    }

    async fn place_segments(
        &self,
        sessions: &mut Sessions<'_>,
        segments: &[Segment],
        placements: &[Vec<String>],
        cancel: &CancelToken,
        committed: &mut Vec<SegmentLocation>,
        timer: &mut OperationTimer,
    ) -> FabricResult<()> {
        for (segment, nodes) in segments.iter().zip(placements) {
            for node_id in nodes {
                if cancel.is_cancelled() {
                    tracing::info!("upload cancelled before {}", segment.segment_id);
                    return Err(FabricError::Cancelled);
                }

                let request = NodeRequest::Store {
                    segment: segment.clone(),
                };
                let location = SegmentLocation {
                    node_id: node_id.clone(),
                    segment_id: segment.segment_id.clone(),
                };
                match sessions.call(node_id, &request).await {
                    Ok(NodeResponse::Stored { .. }) => {
                        committed.push(location);
                        timer.add_bytes(segment.size_bytes);
                    }
                    Ok(NodeResponse::Failed(failure)) => return Err(failure.into()),
                    Ok(_) => {
                        committed.push(location);
                        return Err(unexpected("store", node_id));
                    }
                    Err(e) => {
                        // The node may have committed before the answer was lost
                        committed.push(location);
                        return Err(e);
                    }
                }
            }
        }
        Ok(())
    }

    /// Best-effort purge of segments written by an aborted upload. Purging
    /// an absent segment is a no-op, so unanswered purges are simply sent
    /// again on the next pass.
    async fn rollback(&self, committed: &[SegmentLocation]) {
        if committed.is_empty() {
            return;
        }
        tracing::info!("rolling back {} committed segments", committed.len());

        let mut pending: Vec<&SegmentLocation> = committed.iter().collect();
        for pass in 1..=ROLLBACK_PASSES {
            let mut sessions = Sessions::new(self);
            let mut unanswered = Vec::new();

            for location in pending {
                let request = NodeRequest::Purge {
                    segment_id: location.segment_id.clone(),
                };
                match sessions.call(&location.node_id, &request).await {
                    Ok(NodeResponse::Purged { .. }) => {}
                    Ok(other) => tracing::warn!(
                        "unexpected answer purging {} on {}: {:?}",
                        location.segment_id,
                        location.node_id,
                        other
                    ),
                    Err(FabricError::Node(NodeError::NodeUnreachable(_))) => {
                        tracing::warn!(
                            "{} unreachable, {} left behind",
                            location.node_id,
                            location.segment_id
                        );
                    }
                    Err(e) => {
                        tracing::debug!(
                            "purge of {} on {} unanswered (pass {}): {}",
                            location.segment_id,
                            location.node_id,
                            pass,
                            e
                        );
                        unanswered.push(location);
                    }
                }
            }
            sessions.close_all().await;

            if unanswered.is_empty() {
                return;
            }
            pending = unanswered;
        }

        tracing::warn!(
            "rollback gave up with {} segments unconfirmed",
            pending.len()
        );
    }

    /// Fetch, verify and reassemble a file
    pub async fn download(&self, file_id: &str) -> FabricResult<Bytes> {
        self.download_with_cancel(file_id, &CancelToken::new()).await
    }

    pub async fn download_with_cancel(
        &self,
        file_id: &str,
        cancel: &CancelToken,
    ) -> FabricResult<Bytes> {
        let mut timer = OperationTimer::start(Operation::Download, self.clock.now());
        match self.try_download(file_id, cancel, &mut timer).await {
            Ok(data) => {
                timer.complete(self.clock.now());
                Ok(data)
            }
            Err(e) => {
                tracing::warn!("download of {} failed: {}", file_id, e);
                timer.fail(e.kind());
                Err(e)
            }
        }
    }

    async fn try_download(
        &self,
        file_id: &str,
        cancel: &CancelToken,
        timer: &mut OperationTimer,
    ) -> FabricResult<Bytes> {
        let record = self.metadata.read().await.lookup(file_id)?.clone();

        let mut sessions = Sessions::new(self);
        let mut segments = Vec::with_capacity(record.total_chunks as usize);
        for index in 0..record.total_chunks {
            if cancel.is_cancelled() {
                sessions.close_all().await;
                return Err(FabricError::Cancelled);
            }
            match self.fetch_chunk(&mut sessions, &record, index).await {
                Ok(segment) => {
                    timer.add_bytes(segment.size_bytes);
                    segments.push(segment);
                }
                Err(e) => {
                    sessions.close_all().await;
                    return Err(e);
                }
            }
        }
        sessions.close_all().await;

        let data = reconstruct(segments)?;
        if data.len() as u64 != record.total_size_bytes || file_hash(&data) != record.file_hash {
            tracing::error!("reassembled {} does not match its recorded hash", file_id);
            return Err(FabricError::IntegrityMismatch {
                file_id: file_id.to_string(),
            });
        }

        tracing::info!(
            "downloaded {} ({}, {} bytes)",
            file_id,
            record.original_filename,
            data.len()
        );
        Ok(data)
    }

    /// Try each replica in order; a corrupted read gets one re-fetch
    /// before moving on.
    async fn fetch_chunk(
        &self,
        sessions: &mut Sessions<'_>,
        record: &FileRecord,
        index: u32,
    ) -> FabricResult<Segment> {
        let expected = segment_id(&record.file_hash, index);
        let mut last_error: Option<FabricError> = None;

        for node_id in record.nodes_for(index) {
            if self.health.is_known_dead(&node_id) {
                tracing::debug!("skipping {} for {}: known dead", node_id, expected);
                last_error = Some(NodeError::NodeUnreachable(node_id).into());
                continue;
            }

            for attempt in 1..=2 {
                match self.fetch_from(sessions, &node_id, &expected, index).await {
                    Ok(segment) => return Ok(segment),
                    Err(FabricError::Storage(StorageError::CorruptedSegment(id))) if attempt == 1 => {
                        tracing::warn!("{} from {} failed verification, re-fetching", id, node_id);
                    }
                    Err(e) => {
                        tracing::warn!("{} unavailable on {}: {}", expected, node_id, e);
                        last_error = Some(e);
                        break;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            MetadataError::IndexCorrupted(format!("{} has no placement", expected)).into()
        }))
    }

    async fn fetch_from(
        &self,
        sessions: &mut Sessions<'_>,
        node_id: &str,
        expected: &str,
        index: u32,
    ) -> FabricResult<Segment> {
        let request = NodeRequest::Fetch {
            segment_id: expected.to_string(),
        };
        match sessions.call(node_id, &request).await? {
            NodeResponse::Segment { segment } => {
                if segment.segment_id != expected || segment.chunk_index != index || !segment.verify()
                {
                    return Err(StorageError::CorruptedSegment(expected.to_string()).into());
                }
                Ok(segment)
            }
            NodeResponse::Failed(failure) => Err(failure.into()),
            _ => Err(unexpected("fetch", node_id)),
        }
    }

    /// Every node in registration order
    pub fn list_nodes(&self) -> Vec<NodeInfo> {
        self.registry.nodes().iter().map(|n| n.info()).collect()
    }

    /// Fresh HEALTH_CHECK broadcast
    pub async fn health(&self) -> HealthReport {
        self.health.broadcast().await
    }

    pub fn storage_stats(&self) -> BTreeMap<String, NodeStorage> {
        self.registry
            .nodes()
            .iter()
            .map(|node| {
                let info = node.info();
                let stats = NodeStorage {
                    capacity_bytes: info.capacity_bytes,
                    used_bytes: info.used_bytes,
                    available_bytes: info.available_bytes(),
                    utilization_percent: info.utilization() * 100.0,
                    segments: info.segments,
                };
                (info.node_id, stats)
            })
            .collect()
    }

    pub fn network_stats(&self) -> TransportStats {
        self.transport.stats()
    }

    pub fn topology(&self) -> Topology {
        let report = self.health.last_report();
        let nodes: Vec<TopologyNode> = self
            .list_nodes()
            .into_iter()
            .map(|info| {
                let stopped = info.state == NodeState::Stopped;
                let alive = match report.as_ref().and_then(|r| r.get(&info.node_id)) {
                    Some(status) => status.is_alive() && !stopped,
                    None => !stopped,
                };
                TopologyNode {
                    alive,
                    segments: info.segments,
                    used_bytes: info.used_bytes,
                    peers: info.peers.into_keys().collect(),
                    node_id: info.node_id,
                    address: info.address,
                    state: info.state,
                }
            })
            .collect();

        Topology {
            network_name: self.registry.network_name().to_string(),
            subnet: self.registry.subnet(),
            gateway: self.registry.gateway_address(),
            node_count: nodes.len(),
            nodes,
        }
    }

    pub async fn list_files(&self) -> Vec<FileRecord> {
        self.metadata.read().await.records().cloned().collect()
    }

    pub async fn file_info(&self, file_id: &str) -> FabricResult<FileRecord> {
        Ok(self.metadata.read().await.lookup(file_id)?.clone())
    }

    /// Compare the index with what each node holds. Read-only.
    pub async fn reconcile(&self) -> FabricResult<ReconcileReport> {
        let expected: BTreeSet<SegmentLocation> = {
            let index = self.metadata.read().await;
            index.records().flat_map(locations).collect()
        };

        let mut report = ReconcileReport::default();
        let mut held = BTreeSet::new();
        let mut asked = BTreeSet::new();
        for node in self.registry.nodes() {
            match node.list_segments().await {
                Ok(entries) => {
                    asked.insert(node.node_id().to_string());
                    held.extend(entries.into_iter().map(|entry| SegmentLocation {
                        node_id: node.node_id().to_string(),
                        segment_id: entry.segment_id,
                    }));
                }
                Err(e) => {
                    tracing::warn!("reconcile could not list {}: {}", node.node_id(), e);
                    report.unreachable.push(node.node_id().to_string());
                }
            }
        }

        report.missing = expected
            .iter()
            .filter(|l| asked.contains(&l.node_id) && !held.contains(*l))
            .cloned()
            .collect();
        report.orphaned = held.difference(&expected).cloned().collect();

        tracing::info!(
            "reconcile: {} missing, {} orphaned, {} unreachable",
            report.missing.len(),
            report.orphaned.len(),
            report.unreachable.len()
        );
        Ok(report)
    }

    /// Stop a node; it drops all traffic until restarted
    pub async fn stop_node(&self, node_id: &str) -> FabricResult<NodeState> {
        let state = self.registry.lookup(node_id)?.stop().await?;
        self.health.invalidate();
        Ok(state)
    }

    pub async fn restart_node(&self, node_id: &str) -> FabricResult<NodeState> {
        let state = self.registry.lookup(node_id)?.restart().await?;
        self.health.invalidate();
        Ok(state)
    }

    /// Stop every worker and flush the index
    pub async fn shutdown(&self) -> FabricResult<()> {
        for node in self.registry.nodes() {
            if let Err(e) = node.shutdown().await {
                tracing::debug!("{} already gone: {}", node.node_id(), e);
            }
        }
        self.metadata.read().await.persist().await?;
        tracing::info!("fabric {} shut down", self.config.network_name);
        Ok(())
    }
}

/// Every (node, segment) pair a record references
fn locations(record: &FileRecord) -> Vec<SegmentLocation> {
    (0..record.total_chunks)
        .flat_map(|index| {
            let id = segment_id(&record.file_hash, index);
            record
                .nodes_for(index)
                .into_iter()
                .map(move |node_id| SegmentLocation {
                    node_id,
                    segment_id: id.clone(),
                })
        })
        .collect()
}

fn unexpected(operation: &str, node_id: &str) -> FabricError {
    FabricError::Protocol(format!("unexpected answer to {} from {}", operation, node_id))
}

/// A dead or silent peer is reported as an unreachable node
fn from_network(node_id: &str, err: NetworkError) -> FabricError {
    match err {
        NetworkError::Disconnected(_) | NetworkError::Timeout(_) => {
            NodeError::NodeUnreachable(node_id.to_string()).into()
        }
        other => other.into(),
    }
}

/// Open connections from the client endpoint, one per node, reused
/// across the chunks of one operation
struct Sessions<'a> {
    fabric: &'a StorageFabric,
    open: HashMap<String, Connection<'a>>,
}

impl<'a> Sessions<'a> {
    fn new(fabric: &'a StorageFabric) -> Self {
        Self {
            fabric,
            open: HashMap::new(),
        }
    }

    async fn call(&mut self, node_id: &str, request: &NodeRequest) -> FabricResult<NodeResponse> {
        let fabric = self.fabric;

        if !self.open.contains_key(node_id) {
            let node = fabric.registry.lookup(node_id)?;
            let connection = fabric
                .transport
                .connect(&fabric.registry.gateway_address(), node.address())
                .await
                .map_err(|e| from_network(node_id, e))?;
            self.open.insert(node_id.to_string(), connection);
        }

        let payload = Bytes::from(bincode::serialize(request)?);
        let connection = self
            .open
            .get_mut(node_id)
            .ok_or_else(|| NodeError::NodeUnreachable(node_id.to_string()))?;

        match connection.exchange(payload).await {
            Ok(reply) => Ok(bincode::deserialize(&reply.payload)?),
            Err(e) => {
                // Sequence state is unknown after a failed exchange; FIN so
                // the node can release its side
                if let Some(connection) = self.open.remove(node_id) {
                    if let Err(fin) = connection.close().await {
                        tracing::debug!("FIN to {} after failed exchange: {}", node_id, fin);
                    }
                }
                Err(from_network(node_id, e))
            }
        }
    }

    async fn close_all(self) {
        for (node_id, connection) in self.open {
            if let Err(e) = connection.close().await {
                tracing::debug!("closing connection to {} failed: {}", node_id, e);
            }
        }
    }
}
