//! Simulated network between the client endpoint and storage nodes

pub mod error;
pub mod stats;
pub mod transport;
pub mod types;

pub use error::{NetworkError, NetworkResult};
pub use stats::{LinkStats, PairStats, TransportStats};
pub use transport::{Connection, Transport};
pub use types::{Delivery, NetworkPacket, PacketKind, TransportConfig};
