//! Durable signaling records
//!
//! Every sent `SignalMessage` is mirrored into the record store before it is
//! published. Rows carry an optional `expires_at` used to garbage-collect
//! stale negotiation traffic; delivery to late subscribers is not guaranteed.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::SignalingError;
use super::message::SignalMessage;

/// A persisted signaling row, mirroring `SignalMessage`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRecord {
    pub channel_id: String,
    pub sender_id: Uuid,
    pub receiver_id: Option<Uuid>,
    /// `offer` | `answer` | `ice-candidate`
    pub kind: String,
    pub payload: serde_json::Value,
    /// Epoch milliseconds
    pub created_at: u64,
    pub expires_at: Option<u64>,
}

impl SignalRecord {
    /// Build a record from a message, stamping `created_at` with `now_ms`
    pub fn from_message(
        msg: &SignalMessage,
        now_ms: u64,
        ttl_ms: Option<u64>,
    ) -> Result<Self, SignalingError> {
        Ok(Self {
            channel_id: msg.channel_id.clone(),
            sender_id: msg.sender_id,
            receiver_id: msg.receiver_id,
            kind: msg.payload.kind().to_string(),
            payload: serde_json::to_value(&msg.payload)?,
            created_at: now_ms,
            expires_at: ttl_ms.map(|ttl| now_ms + ttl),
        })
    }
}

/// Durable store for signaling rows
#[async_trait]
pub trait SignalStore: Send + Sync {
    async fn insert(&self, record: SignalRecord) -> Result<(), SignalingError>;

    /// Remove rows whose `expires_at` has passed; returns the number removed
    async fn purge_expired(&self, now_ms: u64) -> Result<usize, SignalingError>;
}

/// In-memory signal store for tests and single-process hosts
#[derive(Default)]
pub struct InMemorySignalStore {
    rows: Mutex<Vec<SignalRecord>>,
}

impl InMemorySignalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }

    /// All rows for a channel, in insertion order
    pub fn rows_for(&self, channel_id: &str) -> Vec<SignalRecord> {
        self.rows
            .lock()
            .iter()
            .filter(|r| r.channel_id == channel_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SignalStore for InMemorySignalStore {
    async fn insert(&self, record: SignalRecord) -> Result<(), SignalingError> {
        self.rows.lock().push(record);
        Ok(())
    }

    async fn purge_expired(&self, now_ms: u64) -> Result<usize, SignalingError> {
        let mut rows = self.rows.lock();
        let before = rows.len();
        rows.retain(|r| r.expires_at.map(|at| at > now_ms).unwrap_or(true));
        Ok(before - rows.len())
    }
}
