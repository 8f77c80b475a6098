//! Simulated lossy, bandwidth-limited link between registered nodes
//!
//! Every delivery attempt charges `bytes / bandwidth` of transmission
//! time plus a random propagation delay against the injected clock, then
//! rolls for loss and corruption. Failed attempts are retried with
//! exponential backoff until `max_attempts` is reached.

use crate::clock::Clock;
use crate::network::error::{NetworkError, NetworkResult};
use crate::network::stats::{StatsRegistry, TransportStats};
use crate::network::types::{Delivery, NetworkPacket, PacketKind, TransportConfig};
use crate::registry::NodeRegistry;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use bytes::Bytes;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

pub struct Transport {
    config: TransportConfig,
    registry: Arc<NodeRegistry>,
    clock: Arc<dyn Clock>,
    rng: Mutex<StdRng>,
    stats: StatsRegistry,
    started_at: Duration,
}

impl Transport {
    pub fn new(
        config: TransportConfig,
        registry: Arc<NodeRegistry>,
        clock: Arc<dyn Clock>,
    ) -> NetworkResult<Self> {
        config.validate()?;

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let started_at = clock.now();

        Ok(Self {
            config,
            registry,
            clock,
            rng: Mutex::new(rng),
            stats: StatsRegistry::default(),
            started_at,
        })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Push one packet across the link, retrying loss and corruption
    pub async fn send(&self, packet: &NetworkPacket) -> NetworkResult<Delivery> {
        if !self.registry.is_routable(&packet.destination) {
            return Err(NetworkError::UnknownAddress(packet.destination.clone()));
        }

        let mut backoff = self.retry_policy();
        let mut last_error = NetworkError::PacketLost;

        for attempt in 1..=self.config.max_attempts {
            match self.attempt(packet).await {
                Ok(mut delivery) => {
                    delivery.attempts = attempt;
                    return Ok(delivery);
                }
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    tracing::debug!("attempt {} for {} failed: {}", attempt, packet, e);
                    last_error = e;
                }
            }

            if attempt < self.config.max_attempts {
                self.stats
                    .record_retransmission(&packet.source, &packet.destination);
                crate::metrics::record_retransmission();
                if let Some(wait) = backoff.next_backoff() {
                    if !wait.is_zero() {
                        self.clock.sleep(wait).await;
                    }
                }
            }
        }

        tracing::warn!(
            "giving up on {} after {} attempts: {}",
            packet,
            self.config.max_attempts,
            last_error
        );
        Err(NetworkError::RetriesExhausted {
            attempts: self.config.max_attempts,
            reason: last_error.to_string(),
        })
    }

    /// One trip over the wire
    async fn attempt(&self, packet: &NetworkPacket) -> NetworkResult<Delivery> {
        let bytes = packet.len();
        let transmission = self.config.transmission_delay(bytes);

        let (lost, corrupt, propagation, flip_at) = {
            let mut rng = self.rng.lock();
            let lost = roll(&mut *rng, self.config.loss_probability);
            let corrupt = roll(&mut *rng, self.config.corruption_probability);
            let min = self.config.propagation_min.as_micros() as u64;
            let max = self.config.propagation_max.as_micros() as u64;
            let propagation = Duration::from_micros(rng.gen_range(min..=max));
            let flip_at = if bytes > 0 { rng.gen_range(0..bytes) } else { 0 };
            (lost, corrupt, propagation, flip_at)
        };

        self.stats
            .record_sent(&packet.source, &packet.destination, bytes as u64, transmission);
        crate::metrics::record_packet_sent(bytes);

        if lost {
            self.clock.sleep(transmission).await;
            self.stats.record_lost(&packet.source, &packet.destination);
            crate::metrics::record_packet_lost();
            return Err(NetworkError::PacketLost);
        }

        self.clock.sleep(transmission + propagation).await;

        if corrupt {
            let damaged = damage(packet, flip_at);
            if let Err(e) = damaged.verify() {
                self.stats
                    .record_corrupted(&packet.source, &packet.destination);
                crate::metrics::record_packet_corrupted();
                return Err(e);
            }
        }

        self.stats
            .record_received(&packet.source, &packet.destination, bytes as u64);
        crate::metrics::record_packet_received(bytes);

        Ok(Delivery {
            attempts: 1,
            transmission,
            propagation,
        })
    }

    /// Send `packet` to a node and wait for its answer, which travels back
    /// over the same simulated link.
    pub async fn request(
        &self,
        mut packet: NetworkPacket,
        timeout: Duration,
    ) -> NetworkResult<NetworkPacket> {
        packet.timestamp = self.clock.now().as_secs_f64();
        self.send(&packet).await?;

        let destination = packet.destination.clone();
        let node = self
            .registry
            .by_address(&destination)
            .ok_or_else(|| NetworkError::UnknownAddress(destination.clone()))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        node.deliver(packet, Some(reply_tx))
            .await
            .map_err(|_| NetworkError::Disconnected(destination.clone()))?;

        let mut reply = match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(NetworkError::Disconnected(destination)),
            Err(_) => return Err(NetworkError::Timeout(timeout)),
        };

        reply.timestamp = self.clock.now().as_secs_f64();
        self.send(&reply).await?;
        Ok(reply)
    }

    /// Fire-and-forget delivery to a node
    pub async fn post(&self, mut packet: NetworkPacket) -> NetworkResult<()> {
        packet.timestamp = self.clock.now().as_secs_f64();
        self.send(&packet).await?;

        let destination = packet.destination.clone();
        let node = self
            .registry
            .by_address(&destination)
            .ok_or_else(|| NetworkError::UnknownAddress(destination.clone()))?;
        node.deliver(packet, None)
            .await
            .map_err(|_| NetworkError::Disconnected(destination))
    }

    /// HEALTH_CHECK round trip. Returns the round-trip time in clock time;
    /// an answer slower than `timeout` counts as a timeout.
    pub async fn probe(
        &self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> NetworkResult<Duration> {
        let started = self.clock.now();
        let packet = NetworkPacket::new(PacketKind::HealthCheck, source, destination, Bytes::new());

        let reply = match tokio::time::timeout(timeout, self.request(packet, timeout)).await {
            Ok(reply) => reply?,
            Err(_) => return Err(NetworkError::Timeout(timeout)),
        };
        if reply.kind != PacketKind::Ack {
            return Err(NetworkError::UnexpectedPacket(format!(
                "{} in answer to HEALTH_CHECK",
                reply.kind
            )));
        }

        // The wall-clock timeout above never fires on a virtual clock
        let rtt = self.clock.now().saturating_sub(started);
        if rtt > timeout {
            return Err(NetworkError::Timeout(timeout));
        }
        Ok(rtt)
    }

    /// Open a sequenced connection, with SYN / SYN_ACK / ACK when enabled
    pub async fn connect(&self, source: &str, destination: &str) -> NetworkResult<Connection<'_>> {
        let initial_seq = u64::from(self.rng.lock().gen::<u32>());

        if !self.config.handshake {
            return Ok(Connection {
                transport: self,
                source: source.to_string(),
                destination: destination.to_string(),
                next_seq: initial_seq,
                peer_ack: 0,
                handshaken: false,
            });
        }

        let syn = NetworkPacket::new(PacketKind::Syn, source, destination, Bytes::new())
            .with_seq(initial_seq);
        let syn_ack = self.request(syn, self.config.request_timeout).await?;

        if syn_ack.kind != PacketKind::SynAck || syn_ack.ack != initial_seq + 1 {
            return Err(NetworkError::HandshakeFailed(format!(
                "{} answered SYN with {} (ack {}, expected {})",
                destination,
                syn_ack.kind,
                syn_ack.ack,
                initial_seq + 1
            )));
        }

        let peer_ack = syn_ack.seq + 1;
        let ack = NetworkPacket::new(PacketKind::Ack, source, destination, Bytes::new())
            .with_seq(initial_seq + 1)
            .with_ack(peer_ack);
        self.post(ack).await?;

        tracing::debug!("connection {} -> {} established", source, destination);
        Ok(Connection {
            transport: self,
            source: source.to_string(),
            destination: destination.to_string(),
            next_seq: initial_seq + 1,
            peer_ack,
            handshaken: true,
        })
    }

    pub fn stats(&self) -> TransportStats {
        let uptime = self.clock.now().saturating_sub(self.started_at);
        self.stats.snapshot(uptime, self.config.loss_probability)
    }

    fn retry_policy(&self) -> ExponentialBackoff {
        let initial = self.config.retry_backoff;
        ExponentialBackoff {
            current_interval: initial,
            initial_interval: initial,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: initial * 16,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

fn roll(rng: &mut StdRng, probability: f64) -> bool {
    probability > 0.0 && rng.gen_bool(probability.min(1.0))
}

/// Copy of `packet` as the receiver would see it after a bit error
fn damage(packet: &NetworkPacket, flip_at: usize) -> NetworkPacket {
    let mut damaged = packet.clone();
    if packet.payload.is_empty() {
        damaged.checksum ^= 1;
    } else {
        let mut raw = packet.payload.to_vec();
        raw[flip_at] ^= 0xFF;
        damaged.payload = Bytes::from(raw);
    }
    damaged
}

/// A sequenced conversation between the client endpoint and one node
pub struct Connection<'a> {
    transport: &'a Transport,
    source: String,
    destination: String,
    next_seq: u64,
    /// Echo of the node's SYN_ACK seq; identifies this connection to the node
    peer_ack: u64,
    handshaken: bool,
}

impl Connection<'_> {
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Send one DATA packet and wait for the node's answer
    pub async fn exchange(&mut self, payload: Bytes) -> NetworkResult<NetworkPacket> {
        let packet = NetworkPacket::new(PacketKind::Data, &self.source, &self.destination, payload)
            .with_seq(self.next_seq)
            .with_ack(self.peer_ack);
        self.next_seq += 1;
        self.transport
            .request(packet, self.transport.config.request_timeout)
            .await
    }

    /// FIN the connection; a no-op when no handshake opened it
    pub async fn close(self) -> NetworkResult<()> {
        if !self.handshaken {
            return Ok(());
        }
        let fin = NetworkPacket::new(PacketKind::Fin, &self.source, &self.destination, Bytes::new())
            .with_seq(self.next_seq)
            .with_ack(self.peer_ack);
        self.transport
            .request(fin, self.transport.config.request_timeout)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::node::NodeWorker;
    use crate::storage::SegmentStore;
    use tempfile::TempDir;

    const NODE: &str = "10.0.0.2";
    const CLIENT: &str = "10.0.0.1";

    async fn setup(config: TransportConfig, dir: &TempDir) -> (Transport, VirtualClock) {
        let registry = Arc::new(NodeRegistry::new("test", "10.0.0"));
        let address = registry.assign_address().unwrap();
        let store = SegmentStore::open("Node_01", dir.path(), 1 << 20).await.unwrap();
        registry
            .register(NodeWorker::spawn("Node_01", address, store))
            .unwrap();

        let clock = VirtualClock::new();
        let transport = Transport::new(config, registry, Arc::new(clock.clone())).unwrap();
        (transport, clock)
    }

    fn data(bytes: usize) -> NetworkPacket {
        NetworkPacket::new(PacketKind::Data, CLIENT, NODE, Bytes::from(vec![1u8; bytes]))
    }

    #[tokio::test]
    async fn test_delivery_charges_transmission_time() {
        let dir = TempDir::new().unwrap();
        let config = TransportConfig::reliable().with_propagation(Duration::ZERO, Duration::ZERO);
        let (transport, clock) = setup(config, &dir).await;

        let delivery = transport.send(&data(64 * 1024)).await.unwrap();

        assert_eq!(delivery.attempts, 1);
        assert_eq!(delivery.transmission, Duration::from_secs(1));
        assert_eq!(clock.now(), Duration::from_secs(1));

        let stats = transport.stats();
        assert_eq!(stats.total.packets_sent, 1);
        assert_eq!(stats.total.packets_received, 1);
        assert_eq!(stats.total.bytes_sent, 64 * 1024);
    }

    #[tokio::test]
    async fn test_total_loss_exhausts_retries() {
        let dir = TempDir::new().unwrap();
        let config = TransportConfig::reliable()
            .with_propagation(Duration::ZERO, Duration::ZERO)
            .with_loss(1.0)
            .with_max_attempts(3)
            .with_retry_backoff(Duration::from_millis(50));
        let (transport, clock) = setup(config, &dir).await;

        let result = transport.send(&data(64 * 1024)).await;
        assert!(matches!(
            result,
            Err(NetworkError::RetriesExhausted { attempts: 3, .. })
        ));

        let stats = transport.stats().total;
        assert_eq!(stats.packets_sent, 3);
        assert_eq!(stats.packets_lost, 3);
        assert_eq!(stats.packets_received, 0);
        assert_eq!(stats.retransmissions, 2);

        // Three transmissions plus 50ms and 100ms of backoff
        assert!(clock.now() >= Duration::from_millis(3150));
        assert!(clock.now() < Duration::from_millis(3151));
    }

    #[tokio::test]
    async fn test_corruption_is_detected_and_retried() {
        let dir = TempDir::new().unwrap();
        let config = TransportConfig::reliable()
            .with_corruption(1.0)
            .with_max_attempts(2);
        let (transport, _clock) = setup(config, &dir).await;

        let result = transport.send(&data(128)).await;
        match result {
            Err(NetworkError::RetriesExhausted { attempts, reason }) => {
                assert_eq!(attempts, 2);
                assert!(reason.contains("Checksum mismatch"), "{}", reason);
            }
            other => panic!("expected RetriesExhausted, got {:?}", other),
        }
        assert_eq!(transport.stats().total.packets_corrupted, 2);
    }

    #[tokio::test]
    async fn test_unknown_destination_rejected() {
        let dir = TempDir::new().unwrap();
        let (transport, _clock) = setup(TransportConfig::reliable(), &dir).await;

        let packet = NetworkPacket::new(PacketKind::Data, CLIENT, "10.0.0.99", Bytes::new());
        assert!(matches!(
            transport.send(&packet).await,
            Err(NetworkError::UnknownAddress(_))
        ));
        assert_eq!(transport.stats().total.packets_sent, 0);
    }

    #[tokio::test]
    async fn test_probe_and_handshake() {
        let dir = TempDir::new().unwrap();
        let (transport, _clock) = setup(TransportConfig::reliable().with_seed(3), &dir).await;

        let rtt = transport
            .probe(CLIENT, NODE, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(rtt >= Duration::from_millis(2));

        let connection = transport.connect(CLIENT, NODE).await.unwrap();
        assert_eq!(connection.destination(), NODE);
        connection.close().await.unwrap();

        let sent: u64 = transport
            .stats()
            .per_pair
            .iter()
            .map(|pair| pair.stats.packets_sent)
            .sum();
        // HEALTH_CHECK, ACK, SYN, SYN_ACK, ACK, FIN, ACK
        assert_eq!(sent, 7);
    }
}
