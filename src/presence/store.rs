//! Presence rows and the store seam
//!
//! One row per (channel, user). Writers always upsert, so the store never
//! holds more than one row per key and the latest write wins.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::PresenceError;

/// Connection state of a participant in a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// One participant's presence in one channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub channel_id: String,
    pub user_id: Uuid,
    pub connection_state: ConnectionState,
    pub is_muted: bool,
    pub is_deafened: bool,
    /// Epoch milliseconds of the last heartbeat write
    pub last_heartbeat: u64,
}

impl PresenceRecord {
    pub fn new(channel_id: &str, user_id: Uuid, now_ms: u64) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            user_id,
            connection_state: ConnectionState::Connecting,
            is_muted: false,
            is_deafened: false,
            last_heartbeat: now_ms,
        }
    }

    /// A row is stale when its heartbeat is older than the threshold.
    /// Stale rows belong to participants that vanished without leaving.
    pub fn is_stale(&self, now_ms: u64, threshold: Duration) -> bool {
        now_ms.saturating_sub(self.last_heartbeat) > threshold.as_millis() as u64
    }
}

/// Storage seam for presence rows
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Insert or replace the row for (channel_id, user_id), last write wins
    async fn upsert(&self, record: PresenceRecord) -> Result<(), PresenceError>;

    async fn get(
        &self,
        channel_id: &str,
        user_id: Uuid,
    ) -> Result<Option<PresenceRecord>, PresenceError>;

    /// All rows for a channel, including disconnected and stale ones
    async fn list(&self, channel_id: &str) -> Result<Vec<PresenceRecord>, PresenceError>;
}

/// Process-local presence store for tests and single-node setups
#[derive(Default)]
pub struct InMemoryPresenceStore {
    rows: Mutex<HashMap<(String, Uuid), PresenceRecord>>,
}

impl InMemoryPresenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceStore for InMemoryPresenceStore {
    async fn upsert(&self, record: PresenceRecord) -> Result<(), PresenceError> {
        let key = (record.channel_id.clone(), record.user_id);
        self.rows.lock().insert(key, record);
        Ok(())
    }

    async fn get(
        &self,
        channel_id: &str,
        user_id: Uuid,
    ) -> Result<Option<PresenceRecord>, PresenceError> {
        Ok(self
            .rows
            .lock()
            .get(&(channel_id.to_string(), user_id))
            .cloned())
    }

    async fn list(&self, channel_id: &str) -> Result<Vec<PresenceRecord>, PresenceError> {
        Ok(self
            .rows
            .lock()
            .values()
            .filter(|r| r.channel_id == channel_id)
            .cloned()
            .collect())
    }
}
