//! Signaling error types

use thiserror::Error;

/// Errors that can occur in the signaling subsystem
#[derive(Error, Debug)]
pub enum SignalingError {
    /// Publish or persist failed; the caller may retry the negotiation step
    #[error("Signal send failed: {0}")]
    SendFailed(String),

    #[error("Relay subscribe failed: {0}")]
    SubscribeFailed(String),

    #[error("Relay connection failed: {0}")]
    RelayConnection(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
