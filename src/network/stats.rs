//! Packet counters, kept per node pair, per node and in aggregate

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct LinkCounters {
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    packets_lost: AtomicU64,
    packets_corrupted: AtomicU64,
    retransmissions: AtomicU64,
    transmission_micros: AtomicU64,
}

impl LinkCounters {
    fn sent(&self, bytes: u64, transmission: Duration) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
        self.transmission_micros
            .fetch_add(transmission.as_micros() as u64, Ordering::Relaxed);
    }

    fn received(&self, bytes: u64) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LinkStats {
        LinkStats {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            packets_lost: self.packets_lost.load(Ordering::Relaxed),
            packets_corrupted: self.packets_corrupted.load(Ordering::Relaxed),
            retransmissions: self.retransmissions.load(Ordering::Relaxed),
            transmission_time: Duration::from_micros(
                self.transmission_micros.load(Ordering::Relaxed),
            ),
        }
    }
}

/// Point-in-time copy of one set of counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_lost: u64,
    pub packets_corrupted: u64,
    pub retransmissions: u64,
    /// Sum of computed transmission delays (bytes / bandwidth)
    pub transmission_time: Duration,
}

impl LinkStats {
    /// Fraction of sent packets that never arrived
    pub fn loss_rate(&self) -> f64 {
        if self.packets_sent == 0 {
            0.0
        } else {
            self.packets_lost as f64 / self.packets_sent as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairStats {
    pub source: String,
    pub destination: String,
    pub stats: LinkStats,
}

/// Snapshot returned by the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportStats {
    pub uptime: Duration,
    /// Delivered bytes per second of clock time
    pub throughput_bytes_per_sec: f64,
    /// Loss probability the transport was configured with
    pub configured_loss_rate: f64,
    pub total: LinkStats,
    /// Keyed by node address
    pub per_node: std::collections::BTreeMap<String, LinkStats>,
    pub per_pair: Vec<PairStats>,
}

#[derive(Debug, Default)]
pub(crate) struct StatsRegistry {
    total: LinkCounters,
    nodes: DashMap<String, Arc<LinkCounters>>,
    pairs: DashMap<(String, String), Arc<LinkCounters>>,
}

impl StatsRegistry {
    fn node(&self, address: &str) -> Arc<LinkCounters> {
        self.nodes
            .entry(address.to_string())
            .or_default()
            .value()
            .clone()
    }

    fn pair(&self, source: &str, destination: &str) -> Arc<LinkCounters> {
        self.pairs
            .entry((source.to_string(), destination.to_string()))
            .or_default()
            .value()
            .clone()
    }

    pub fn record_sent(&self, source: &str, destination: &str, bytes: u64, transmission: Duration) {
        self.total.sent(bytes, transmission);
        self.node(source).sent(bytes, transmission);
        self.pair(source, destination).sent(bytes, transmission);
    }

    pub fn record_received(&self, source: &str, destination: &str, bytes: u64) {
        self.total.received(bytes);
        self.node(destination).received(bytes);
        self.pair(source, destination).received(bytes);
    }

    pub fn record_lost(&self, source: &str, destination: &str) {
        self.total.packets_lost.fetch_add(1, Ordering::Relaxed);
        self.pair(source, destination)
            .packets_lost
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_corrupted(&self, source: &str, destination: &str) {
        self.total.packets_corrupted.fetch_add(1, Ordering::Relaxed);
        self.pair(source, destination)
            .packets_corrupted
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retransmission(&self, source: &str, destination: &str) {
        self.total.retransmissions.fetch_add(1, Ordering::Relaxed);
        self.pair(source, destination)
            .retransmissions
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, uptime: Duration, configured_loss_rate: f64) -> TransportStats {
        let total = self.total.snapshot();
        let throughput_bytes_per_sec = if uptime.is_zero() {
            0.0
        } else {
            total.bytes_received as f64 / uptime.as_secs_f64()
        };

        let per_node = self
            .nodes
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect();

        let mut per_pair: Vec<PairStats> = self
            .pairs
            .iter()
            .map(|entry| PairStats {
                source: entry.key().0.clone(),
                destination: entry.key().1.clone(),
                stats: entry.value().snapshot(),
            })
            .collect();
        per_pair.sort_by(|a, b| {
            (a.source.as_str(), a.destination.as_str())
                .cmp(&(b.source.as_str(), b.destination.as_str()))
        });

        TransportStats {
            uptime,
            throughput_bytes_per_sec,
            configured_loss_rate,
            total,
            per_node,
            per_pair,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_roll_up() {
        let stats = StatsRegistry::default();
        stats.record_sent("192.168.1.1", "192.168.1.2", 100, Duration::from_millis(10));
        stats.record_received("192.168.1.1", "192.168.1.2", 100);
        stats.record_sent("192.168.1.1", "192.168.1.3", 50, Duration::from_millis(5));
        stats.record_lost("192.168.1.1", "192.168.1.3");

        let snapshot = stats.snapshot(Duration::from_secs(2), 0.01);
        assert_eq!(snapshot.total.packets_sent, 2);
        assert_eq!(snapshot.total.bytes_sent, 150);
        assert_eq!(snapshot.total.packets_lost, 1);
        assert_eq!(snapshot.total.transmission_time, Duration::from_millis(15));
        assert_eq!(snapshot.throughput_bytes_per_sec, 50.0);
        assert_eq!(snapshot.configured_loss_rate, 0.01);

        assert_eq!(snapshot.per_pair.len(), 2);
        assert_eq!(snapshot.per_pair[0].destination, "192.168.1.2");
        assert_eq!(snapshot.per_pair[1].stats.loss_rate(), 1.0);

        assert_eq!(snapshot.per_node["192.168.1.1"].packets_sent, 2);
        assert_eq!(snapshot.per_node["192.168.1.2"].bytes_received, 100);
    }

    #[test]
    fn test_parallel_recording_loses_no_updates() {
        let stats = StatsRegistry::default();

        std::thread::scope(|scope| {
            for worker in 0..8 {
                let stats = &stats;
                scope.spawn(move || {
                    let destination = format!("192.168.1.{}", 2 + worker % 3);
                    for _ in 0..1000 {
                        stats.record_sent("192.168.1.1", &destination, 10, Duration::from_micros(1));
                        stats.record_received("192.168.1.1", &destination, 10);
                    }
                });
            }
        });

        let snapshot = stats.snapshot(Duration::from_secs(1), 0.0);
        assert_eq!(snapshot.total.packets_sent, 8000);
        assert_eq!(snapshot.total.bytes_received, 80_000);
        assert_eq!(snapshot.total.transmission_time, Duration::from_millis(8));
        assert_eq!(snapshot.per_node["192.168.1.1"].packets_sent, 8000);
        let per_pair: u64 = snapshot.per_pair.iter().map(|p| p.stats.packets_sent).sum();
        assert_eq!(per_pair, 8000);
    }
}
