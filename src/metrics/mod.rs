//! Metrics and observability module
//!
//! Emits counters, gauges and histograms through the `metrics` facade.
//! No exporter is installed by the crate; embedders choose one.
//!
//! Key metrics:
//! - Packets sent, received, lost, corrupted and retransmitted
//! - Segments stored, fetched and purged per node
//! - Upload and download duration and throughput
//! - Per-node storage usage and alive node count

pub mod recorder;

pub use recorder::{
    init_metrics, record_packet_corrupted, record_packet_lost, record_packet_received,
    record_packet_sent, record_retransmission, record_segment_fetched, record_segment_purged,
    record_segment_stored, set_alive_nodes, set_node_storage, Operation, OperationTimer,
};
