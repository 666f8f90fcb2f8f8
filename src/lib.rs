//! voicemesh - Peer-mesh voice signaling and connection negotiation
//!
//! This library builds and maintains a full mesh of peer audio links for a
//! voice channel: offer/answer negotiation with glare resolution, trickle
//! ICE candidate relay, presence rows with heartbeats, and local media
//! capture with mute control.

pub mod engine;
pub mod error;
pub mod identity;
pub mod media;
pub mod mesh;
pub mod presence;
pub mod signaling;
pub mod traversal;

pub use engine::{EngineConfig, EngineDeps, VoiceEngine};
pub use error::EngineError;
pub use identity::Participant;
pub use mesh::MeshEvent;

/// Milliseconds since the Unix epoch
pub fn epoch_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
