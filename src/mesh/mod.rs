//! Peer mesh: per-peer links, connection management, and the handshake

mod error;
mod link;
mod loopback;
mod manager;
mod negotiation;
mod transport;

pub use error::MeshError;
pub use link::LinkState;
pub use loopback::{LoopbackFactory, LoopbackNetwork, LoopbackTransport};
pub use manager::{MeshEvent, PeerConnectionManager};
pub use negotiation::NegotiationProtocol;
pub use transport::{PeerTransport, TransportEvent, TransportFactory};
