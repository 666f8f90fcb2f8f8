//! Signaling subsystem
//!
//! Typed negotiation messages, the relay/store seams, the channel-scoped
//! transport, and a WebSocket relay implementation.

mod error;
mod message;
mod relay;
mod store;
mod transport;
mod ws;

pub use error::SignalingError;
pub use message::{
    channel_topic, IceCandidate, SdpType, SessionDescription, SignalMessage, SignalPayload,
};
pub use relay::{InMemoryRelay, MessageRelay};
pub use store::{InMemorySignalStore, SignalRecord, SignalStore};
pub use transport::{SignalHandler, SignalingTransport};
pub use ws::{RelayServer, RelayServerHandle, WsRelay};
