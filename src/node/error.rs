use thiserror::Error;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Node unreachable: {0}")]
    NodeUnreachable(String),

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Node already registered: {0}")]
    DuplicateNode(String),

    #[error("Address space {0} is exhausted")]
    NetworkFull(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),
}

pub type NodeResult<T> = Result<T, NodeError>;
