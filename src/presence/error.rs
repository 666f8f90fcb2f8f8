use thiserror::Error;

#[derive(Error, Debug)]
pub enum PresenceError {
    #[error("Presence store operation failed: {0}")]
    StoreFailed(String),
}
