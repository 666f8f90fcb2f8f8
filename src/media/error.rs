//! Media error types

use thiserror::Error;

/// Errors that can occur in the media subsystem
#[derive(Error, Debug)]
pub enum MediaError {
    /// Capture device denied or missing; fatal to joining a channel
    #[error("Media unavailable: {0}")]
    Unavailable(String),

    #[error("Stream error: {0}")]
    StreamError(String),
}
