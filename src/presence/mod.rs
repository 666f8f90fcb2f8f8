//! Channel presence: who is in the channel and whether they are alive

mod error;
mod store;
mod tracker;

pub use error::PresenceError;
pub use store::{ConnectionState, InMemoryPresenceStore, PresenceRecord, PresenceStore};
pub use tracker::SessionPresenceTracker;
