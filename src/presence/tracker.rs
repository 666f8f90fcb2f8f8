//! Local presence lifecycle and heartbeats
//!
//! Publishes the local participant's row and keeps it fresh while connected.
//! Readers on other nodes detect crashes through heartbeat staleness, so the
//! heartbeat task only runs between `mark_connected` and `leave`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::PresenceError;
use super::store::{ConnectionState, PresenceRecord, PresenceStore};
use crate::epoch_ms;

/// Writes and refreshes the local participant's presence row
pub struct SessionPresenceTracker {
    channel_id: String,
    user_id: Uuid,
    store: Arc<dyn PresenceStore>,
    heartbeat_interval: Duration,
    staleness_threshold: Duration,
    row: Arc<Mutex<PresenceRecord>>,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionPresenceTracker {
    pub fn new(
        channel_id: &str,
        user_id: Uuid,
        store: Arc<dyn PresenceStore>,
        heartbeat_interval: Duration,
        staleness_threshold: Duration,
    ) -> Self {
        let row = PresenceRecord::new(channel_id, user_id, epoch_ms());
        Self {
            channel_id: channel_id.to_string(),
            user_id,
            store,
            heartbeat_interval,
            staleness_threshold,
            row: Arc::new(Mutex::new(row)),
            heartbeat_task: Mutex::new(None),
        }
    }

    /// Publish the Connecting row; called before any signaling happens
    pub async fn join(&self) -> Result<(), PresenceError> {
        let row = self.update_row(|r| {
            r.connection_state = ConnectionState::Connecting;
        });
        self.store.upsert(row).await
    }

    /// Publish the Connected row and start the heartbeat loop
    pub async fn mark_connected(&self) -> Result<(), PresenceError> {
        let row = self.update_row(|r| {
            r.connection_state = ConnectionState::Connected;
        });
        self.store.upsert(row).await?;

        let store = self.store.clone();
        let shared = self.row.clone();
        let interval = self.heartbeat_interval;
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let row = {
                    let mut row = shared.lock();
                    row.last_heartbeat = epoch_ms();
                    row.clone()
                };
                if let Err(e) = store.upsert(row).await {
                    warn!("Heartbeat write failed: {}", e);
                }
            }
        });

        if let Some(old) = self.heartbeat_task.lock().replace(task) {
            old.abort();
        }
        debug!("Presence connected in channel {}", self.channel_id);
        Ok(())
    }

    pub async fn set_muted(&self, muted: bool) -> Result<(), PresenceError> {
        let row = self.update_row(|r| r.is_muted = muted);
        self.store.upsert(row).await
    }

    pub async fn set_deafened(&self, deafened: bool) -> Result<(), PresenceError> {
        let row = self.update_row(|r| r.is_deafened = deafened);
        self.store.upsert(row).await
    }

    /// Stop heartbeats and publish the Disconnected row, idempotent
    pub async fn leave(&self) -> Result<(), PresenceError> {
        if let Some(task) = self.heartbeat_task.lock().take() {
            task.abort();
        }
        let row = self.update_row(|r| {
            r.connection_state = ConnectionState::Disconnected;
        });
        self.store.upsert(row).await
    }

    /// Live remote rows: self, disconnected, and stale rows are filtered out
    pub async fn remote_participants(&self) -> Result<Vec<PresenceRecord>, PresenceError> {
        let now = epoch_ms();
        let rows = self.store.list(&self.channel_id).await?;
        Ok(rows
            .into_iter()
            .filter(|r| {
                r.user_id != self.user_id
                    && r.connection_state != ConnectionState::Disconnected
                    && !r.is_stale(now, self.staleness_threshold)
            })
            .collect())
    }

    fn update_row(&self, mutate: impl FnOnce(&mut PresenceRecord)) -> PresenceRecord {
        let mut row = self.row.lock();
        mutate(&mut row);
        row.last_heartbeat = epoch_ms();
        row.clone()
    }
}

impl Drop for SessionPresenceTracker {
    fn drop(&mut self) {
        if let Some(task) = self.heartbeat_task.lock().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::store::InMemoryPresenceStore;
    use super::*;

    fn tracker(store: Arc<dyn PresenceStore>, user: Uuid) -> SessionPresenceTracker {
        SessionPresenceTracker::new(
            "general",
            user,
            store,
            Duration::from_millis(10),
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn test_join_publishes_connecting_row() {
        let store = Arc::new(InMemoryPresenceStore::new());
        let user = Uuid::new_v4();
        let tracker = tracker(store.clone(), user);

        tracker.join().await.unwrap();

        let row = store.get("general", user).await.unwrap().unwrap();
        assert_eq!(row.connection_state, ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_heartbeat_refreshes_row_while_connected() {
        let store = Arc::new(InMemoryPresenceStore::new());
        let user = Uuid::new_v4();
        let tracker = tracker(store.clone(), user);

        tracker.join().await.unwrap();
        tracker.mark_connected().await.unwrap();
        let first = store.get("general", user).await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let later = store.get("general", user).await.unwrap().unwrap();
        assert_eq!(later.connection_state, ConnectionState::Connected);
        assert!(later.last_heartbeat >= first.last_heartbeat);

        tracker.leave().await.unwrap();
    }

    #[tokio::test]
    async fn test_leave_sets_disconnected_and_is_idempotent() {
        let store = Arc::new(InMemoryPresenceStore::new());
        let user = Uuid::new_v4();
        let tracker = tracker(store.clone(), user);

        tracker.join().await.unwrap();
        tracker.mark_connected().await.unwrap();
        tracker.leave().await.unwrap();
        tracker.leave().await.unwrap();

        let row = store.get("general", user).await.unwrap().unwrap();
        assert_eq!(row.connection_state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_remote_participants_filters_self_disconnected_and_stale() {
        let store = Arc::new(InMemoryPresenceStore::new());
        let user = Uuid::new_v4();
        let tracker = tracker(store.clone(), user);
        tracker.join().await.unwrap();

        let live = Uuid::new_v4();
        store
            .upsert({
                let mut r = PresenceRecord::new("general", live, epoch_ms());
                r.connection_state = ConnectionState::Connected;
                r
            })
            .await
            .unwrap();

        let gone = Uuid::new_v4();
        store
            .upsert({
                let mut r = PresenceRecord::new("general", gone, epoch_ms());
                r.connection_state = ConnectionState::Disconnected;
                r
            })
            .await
            .unwrap();

        let stale = Uuid::new_v4();
        store
            .upsert({
                let mut r = PresenceRecord::new("general", stale, epoch_ms() - 60_000);
                r.connection_state = ConnectionState::Connected;
                r
            })
            .await
            .unwrap();

        let remotes = tracker.remote_participants().await.unwrap();
        assert_eq!(remotes.len(), 1);
        assert_eq!(remotes[0].user_id, live);
    }

    #[tokio::test]
    async fn test_mute_and_deafen_flags_persisted() {
        let store = Arc::new(InMemoryPresenceStore::new());
        let user = Uuid::new_v4();
        let tracker = tracker(store.clone(), user);

        tracker.join().await.unwrap();
        tracker.set_muted(true).await.unwrap();
        tracker.set_deafened(true).await.unwrap();

        let row = store.get("general", user).await.unwrap().unwrap();
        assert!(row.is_muted);
        assert!(row.is_deafened);
    }
}
