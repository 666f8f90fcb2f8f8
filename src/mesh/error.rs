//! Mesh error types

use thiserror::Error;

use crate::signaling::SignalingError;

/// Errors that can occur while negotiating or maintaining peer links
#[derive(Error, Debug)]
pub enum MeshError {
    #[error("Transport creation failed: {0}")]
    TransportCreateFailed(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),
}
