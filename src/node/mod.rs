//! Storage nodes
//!
//! A node is a worker task owning one segment store, driven by packets
//! from the transport and a small set of admin commands.

pub mod error;
pub mod handle;
pub mod state_machine;
pub mod types;
pub mod worker;

pub use error::{NodeError, NodeResult};
pub use handle::NodeHandle;
pub use state_machine::NodeStateMachine;
pub use types::{NodeEvent, NodeInfo, NodeRequest, NodeResponse, NodeState, RemoteFailure};
pub use worker::NodeWorker;
