use crate::network::error::{NetworkError, NetworkResult};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PacketKind {
    Syn,
    SynAck,
    Ack,
    Data,
    Fin,
    HealthCheck,
}

impl std::fmt::Display for PacketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PacketKind::Syn => "SYN",
            PacketKind::SynAck => "SYN_ACK",
            PacketKind::Ack => "ACK",
            PacketKind::Data => "DATA",
            PacketKind::Fin => "FIN",
            PacketKind::HealthCheck => "HEALTH_CHECK",
        };
        f.write_str(name)
    }
}

/// A packet on the simulated wire. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkPacket {
    pub kind: PacketKind,
    pub source: String,
    pub destination: String,
    pub payload: Bytes,
    /// Send time in clock seconds, stamped by the transport
    pub timestamp: f64,
    pub packet_id: String,
    pub seq: u64,
    pub ack: u64,
    pub checksum: u32,
}

impl NetworkPacket {
    pub fn new(
        kind: PacketKind,
        source: impl Into<String>,
        destination: impl Into<String>,
        payload: Bytes,
    ) -> Self {
        let checksum = Self::compute_checksum(&payload);
        Self {
            kind,
            source: source.into(),
            destination: destination.into(),
            payload,
            timestamp: 0.0,
            packet_id: uuid::Uuid::new_v4().to_string(),
            seq: 0,
            ack: 0,
            checksum,
        }
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    pub fn with_ack(mut self, ack: u64) -> Self {
        self.ack = ack;
        self
    }

    /// Build the answer to this packet, addressed back to its sender
    pub fn reply(&self, kind: PacketKind, payload: Bytes) -> Self {
        NetworkPacket::new(kind, self.destination.clone(), self.source.clone(), payload)
            .with_seq(self.ack)
            .with_ack(self.seq + 1)
    }

    /// 32-bit integrity checksum: the leading bytes of the payload's BLAKE3 digest
    pub fn compute_checksum(payload: &[u8]) -> u32 {
        let digest = blake3::hash(payload);
        let bytes = digest.as_bytes();
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    pub fn verify(&self) -> NetworkResult<()> {
        let actual = Self::compute_checksum(&self.payload);
        if actual != self.checksum {
            return Err(NetworkError::ChecksumMismatch {
                expected: self.checksum,
                actual,
            });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl std::fmt::Display for NetworkPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Packet({}, {}->{}, {}B, seq {})",
            self.kind,
            self.source,
            self.destination,
            self.payload.len(),
            self.seq
        )
    }
}

/// Link model shared by every node pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Link bandwidth in bits per second
    pub bandwidth_bps: u64,

    /// Propagation delay is drawn uniformly from this range
    pub propagation_min: Duration,
    pub propagation_max: Duration,

    /// Chance (0.0 - 1.0) that a packet never arrives
    pub loss_probability: f64,

    /// Chance (0.0 - 1.0) that a packet arrives with a flipped byte
    pub corruption_probability: f64,

    /// Delivery attempts per packet before giving up
    pub max_attempts: u32,

    /// First retry delay; doubles per retry. Zero retries immediately.
    pub retry_backoff: Duration,

    /// How long a requester waits for the peer to answer
    pub request_timeout: Duration,

    /// Perform SYN / SYN_ACK / ACK before DATA
    pub handshake: bool,

    /// Fixed RNG seed for reproducible loss patterns
    pub seed: Option<u64>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bandwidth_bps: 64 * 1024 * 8, // 64 KB/s
            propagation_min: Duration::from_millis(1),
            propagation_max: Duration::from_millis(10),
            loss_probability: 0.01,
            corruption_probability: 0.0,
            max_attempts: 3,
            retry_backoff: Duration::from_millis(50),
            request_timeout: Duration::from_secs(5),
            handshake: true,
            seed: None,
        }
    }
}

impl TransportConfig {
    /// A loss-free, corruption-free link
    pub fn reliable() -> Self {
        Self {
            loss_probability: 0.0,
            corruption_probability: 0.0,
            ..Default::default()
        }
    }

    pub fn with_bandwidth_bytes_per_sec(mut self, bytes_per_sec: u64) -> Self {
        self.bandwidth_bps = bytes_per_sec * 8;
        self
    }

    pub fn with_propagation(mut self, min: Duration, max: Duration) -> Self {
        self.propagation_min = min;
        self.propagation_max = max;
        self
    }

    pub fn with_loss(mut self, probability: f64) -> Self {
        self.loss_probability = probability;
        self
    }

    pub fn with_corruption(mut self, probability: f64) -> Self {
        self.corruption_probability = probability;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_handshake(mut self, handshake: bool) -> Self {
        self.handshake = handshake;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Time to put `payload_bytes` on the wire
    pub fn transmission_delay(&self, payload_bytes: usize) -> Duration {
        Duration::from_secs_f64(payload_bytes as f64 * 8.0 / self.bandwidth_bps as f64)
    }

    pub fn validate(&self) -> NetworkResult<()> {
        if self.bandwidth_bps == 0 {
            return Err(NetworkError::InvalidConfig("bandwidth must be positive".into()));
        }
        if self.propagation_min > self.propagation_max {
            return Err(NetworkError::InvalidConfig(format!(
                "propagation range inverted: {:?} > {:?}",
                self.propagation_min, self.propagation_max
            )));
        }
        for (name, p) in [
            ("loss_probability", self.loss_probability),
            ("corruption_probability", self.corruption_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(NetworkError::InvalidConfig(format!(
                    "{} must be within [0, 1], got {}",
                    name, p
                )));
            }
        }
        if self.max_attempts == 0 {
            return Err(NetworkError::InvalidConfig("max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

/// Outcome of a successful delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub attempts: u32,
    pub transmission: Duration,
    pub propagation: Duration,
}
