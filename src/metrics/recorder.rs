//! Metrics recorder for fabric operations
//!
//! Records packet, segment and file-level metrics. Durations are
//! measured on the fabric clock, so virtual-time runs report simulated
//! durations rather than wall time.

use ::metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize metric descriptions (call once at startup)
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return; // Already initialized
    }

    // Wire counters
    describe_counter!("chunkmesh_packets_sent_total", "Delivery attempts put on the wire");
    describe_counter!(
        "chunkmesh_packets_received_total",
        "Packets that arrived intact"
    );
    describe_counter!("chunkmesh_packets_lost_total", "Packets dropped by the link");
    describe_counter!(
        "chunkmesh_packets_corrupted_total",
        "Packets rejected on checksum mismatch"
    );
    describe_counter!(
        "chunkmesh_retransmissions_total",
        "Packets resent after loss or corruption"
    );
    describe_counter!("chunkmesh_bytes_sent_total", "Payload bytes sent");
    describe_counter!("chunkmesh_bytes_received_total", "Payload bytes delivered");

    // Node counters
    describe_counter!("chunkmesh_segments_stored_total", "Segments committed by nodes");
    describe_counter!("chunkmesh_segments_fetched_total", "Segments served by nodes");
    describe_counter!("chunkmesh_segments_purged_total", "Segments purged by nodes");

    // File counters
    describe_counter!("chunkmesh_uploads_completed_total", "Uploads committed");
    describe_counter!("chunkmesh_uploads_failed_total", "Uploads rolled back");
    describe_counter!("chunkmesh_downloads_completed_total", "Downloads verified");
    describe_counter!("chunkmesh_downloads_failed_total", "Downloads that failed");

    // Gauges
    describe_gauge!("chunkmesh_node_storage_used_bytes", "Bytes stored per node");
    describe_gauge!("chunkmesh_alive_nodes", "Nodes alive at the last health broadcast");

    // Histograms
    describe_histogram!(
        "chunkmesh_operation_duration_seconds",
        "Upload and download duration in clock time"
    );
    describe_histogram!(
        "chunkmesh_throughput_bytes_per_second",
        "Upload and download throughput in clock time"
    );
}

// ============== Wire ==============

pub fn record_packet_sent(bytes: usize) {
    counter!("chunkmesh_packets_sent_total").increment(1);
    counter!("chunkmesh_bytes_sent_total").increment(bytes as u64);
}

pub fn record_packet_received(bytes: usize) {
    counter!("chunkmesh_packets_received_total").increment(1);
    counter!("chunkmesh_bytes_received_total").increment(bytes as u64);
}

pub fn record_packet_lost() {
    counter!("chunkmesh_packets_lost_total").increment(1);
}

pub fn record_packet_corrupted() {
    counter!("chunkmesh_packets_corrupted_total").increment(1);
}

pub fn record_retransmission() {
    counter!("chunkmesh_retransmissions_total").increment(1);
}

// ============== Nodes ==============

pub fn record_segment_stored(node_id: &str, bytes: u64) {
    counter!("chunkmesh_segments_stored_total", "node" => node_id.to_string()).increment(1);
    histogram!("chunkmesh_segment_size_bytes").record(bytes as f64);
}

pub fn record_segment_fetched(node_id: &str, bytes: u64) {
    counter!("chunkmesh_segments_fetched_total", "node" => node_id.to_string()).increment(1);
    counter!("chunkmesh_segment_bytes_served_total", "node" => node_id.to_string())
        .increment(bytes);
}

pub fn record_segment_purged(node_id: &str) {
    counter!("chunkmesh_segments_purged_total", "node" => node_id.to_string()).increment(1);
}

/// Update per-node storage gauge
pub fn set_node_storage(node_id: &str, used_bytes: u64) {
    gauge!("chunkmesh_node_storage_used_bytes", "node" => node_id.to_string())
        .set(used_bytes as f64);
}

pub fn set_alive_nodes(count: usize) {
    gauge!("chunkmesh_alive_nodes").set(count as f64);
}

// ============== Files ==============

/// Which file-level operation an [`OperationTimer`] is measuring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Upload,
    Download,
}

impl Operation {
    fn as_str(&self) -> &'static str {
        match self {
            Operation::Upload => "upload",
            Operation::Download => "download",
        }
    }
}

pub fn record_operation_complete(operation: Operation, duration: Duration, bytes: u64) {
    match operation {
        Operation::Upload => counter!("chunkmesh_uploads_completed_total").increment(1),
        Operation::Download => counter!("chunkmesh_downloads_completed_total").increment(1),
    }

    histogram!("chunkmesh_operation_duration_seconds", "operation" => operation.as_str())
        .record(duration.as_secs_f64());

    let throughput = if duration.as_secs_f64() > 0.0 {
        bytes as f64 / duration.as_secs_f64()
    } else {
        0.0
    };
    histogram!("chunkmesh_throughput_bytes_per_second", "operation" => operation.as_str())
        .record(throughput);
}

pub fn record_operation_failed(operation: Operation, reason: &str) {
    match operation {
        Operation::Upload => {
            counter!("chunkmesh_uploads_failed_total", "reason" => reason.to_string()).increment(1)
        }
        Operation::Download => {
            counter!("chunkmesh_downloads_failed_total", "reason" => reason.to_string())
                .increment(1)
        }
    }
}

/// Times one upload or download against clock readings
pub struct OperationTimer {
    operation: Operation,
    started_at: Duration,
    bytes: u64,
}

impl OperationTimer {
    /// `now` is the current clock reading
    pub fn start(operation: Operation, now: Duration) -> Self {
        Self {
            operation,
            started_at: now,
            bytes: 0,
        }
    }

    pub fn add_bytes(&mut self, bytes: u64) {
        self.bytes += bytes;
    }

    pub fn elapsed(&self, now: Duration) -> Duration {
        now.saturating_sub(self.started_at)
    }

    /// Bytes per second of clock time
    pub fn throughput(&self, now: Duration) -> f64 {
        let secs = self.elapsed(now).as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 / secs
        } else {
            0.0
        }
    }

    pub fn complete(self, now: Duration) {
        record_operation_complete(self.operation, self.elapsed(now), self.bytes);
    }

    pub fn fail(self, reason: &str) {
        record_operation_failed(self.operation, reason);
    }
}
