use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PlacementError {
    #[error("No live nodes available")]
    NoLiveNodes,

    #[error("Replication factor {requested} exceeds {available} live nodes")]
    InsufficientReplicas { requested: u32, available: usize },

    #[error("Replication factor must be at least 1")]
    ZeroReplication,
}

pub type PlacementResult<T> = Result<T, PlacementError>;
