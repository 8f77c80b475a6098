use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Insufficient space: need {needed} bytes, {available} available")]
    InsufficientSpace { needed: u64, available: u64 },

    #[error("Segment not found: {0}")]
    SegmentNotFound(String),

    #[error("Corrupted segment: {0}")]
    CorruptedSegment(String),

    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(usize),

    #[error("Segment manifest error: {0}")]
    Manifest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Manifest(err.to_string())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
