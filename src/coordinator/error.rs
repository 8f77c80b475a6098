use crate::node::RemoteFailure;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FabricError {
    #[error("Network error: {0}")]
    Network(#[from] crate::network::NetworkError),

    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] crate::metadata::MetadataError),

    #[error("Node error: {0}")]
    Node(#[from] crate::node::NodeError),

    #[error("Placement error: {0}")]
    Placement(#[from] crate::planner::PlacementError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Reassembled file {file_id} does not match its recorded hash")]
    IntegrityMismatch { file_id: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl FabricError {
    /// Short label used for failure metrics
    pub fn kind(&self) -> &'static str {
        match self {
            FabricError::Network(_) => "network",
            FabricError::Storage(_) => "storage",
            FabricError::Metadata(_) => "metadata",
            FabricError::Node(_) => "node",
            FabricError::Placement(_) => "placement",
            FabricError::Cancelled => "cancelled",
            FabricError::IntegrityMismatch { .. } => "integrity",
            FabricError::InvalidArgument(_) => "invalid_argument",
            FabricError::Protocol(_) => "protocol",
            FabricError::Config(_) => "config",
        }
    }
}

impl From<RemoteFailure> for FabricError {
    fn from(failure: RemoteFailure) -> Self {
        use crate::network::NetworkError;
        use crate::storage::StorageError;

        match failure {
            RemoteFailure::InsufficientSpace { needed, available } => {
                StorageError::InsufficientSpace { needed, available }.into()
            }
            RemoteFailure::SegmentNotFound(id) => StorageError::SegmentNotFound(id).into(),
            RemoteFailure::CorruptedSegment(id) => StorageError::CorruptedSegment(id).into(),
            RemoteFailure::OutOfOrder { expected, received } => {
                NetworkError::OutOfOrder { expected, received }.into()
            }
            RemoteFailure::Malformed(reason) => FabricError::Protocol(reason),
            RemoteFailure::Io(reason) => {
                StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, reason)).into()
            }
        }
    }
}

impl From<bincode::Error> for FabricError {
    fn from(err: bincode::Error) -> Self {
        FabricError::Protocol(err.to_string())
    }
}

pub type FabricResult<T> = Result<T, FabricError>;
