use thiserror::Error;

use crate::media::MediaError;
use crate::mesh::MeshError;
use crate::presence::PresenceError;
use crate::signaling::SignalingError;

/// Top-level engine failure, aggregating the component errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Already joined to a channel; leave first")]
    AlreadyJoined,

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Presence error: {0}")]
    Presence(#[from] PresenceError),

    #[error("Mesh error: {0}")]
    Mesh(#[from] MeshError),
}
