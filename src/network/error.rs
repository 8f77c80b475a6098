use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Delivery failed after {attempts} attempts: {reason}")]
    RetriesExhausted { attempts: u32, reason: String },

    #[error("Packet lost")]
    PacketLost,

    #[error("Checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("Unknown address: {0}")]
    UnknownAddress(String),

    #[error("Peer at {0} is not accepting packets")]
    Disconnected(String),

    #[error("Out-of-order packet: expected seq {expected}, received {received}")]
    OutOfOrder { expected: u64, received: u64 },

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Unexpected packet: {0}")]
    UnexpectedPacket(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl NetworkError {
    /// Loss and corruption are retried by the transport; everything else is final
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NetworkError::PacketLost | NetworkError::ChecksumMismatch { .. }
        )
    }
}

impl From<bincode::Error> for NetworkError {
    fn from(err: bincode::Error) -> Self {
        NetworkError::Serialization(err.to_string())
    }
}

pub type NetworkResult<T> = Result<T, NetworkError>;
