//! Channel-scoped signaling transport
//!
//! Bridges the relay's raw topic deliveries into typed `SignalMessage`s.
//! Self-originated messages are discarded before they reach the handler, and
//! every outbound message is persisted to the record store before publish.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::SignalingError;
use super::message::{channel_topic, SignalMessage, SignalPayload};
use super::relay::MessageRelay;
use super::store::{SignalRecord, SignalStore};
use crate::epoch_ms;

/// GC horizon for persisted signaling rows
const SIGNAL_TTL_MS: u64 = 60_000;

/// Receiver of inbound signaling messages for a channel
#[async_trait]
pub trait SignalHandler: Send + Sync {
    async fn on_signal(&self, msg: SignalMessage);
}

/// Sends and receives `SignalMessage`s on channel topics
pub struct SignalingTransport {
    local_id: Uuid,
    relay: Arc<dyn MessageRelay>,
    store: Arc<dyn SignalStore>,
    subscriptions: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl SignalingTransport {
    pub fn new(local_id: Uuid, relay: Arc<dyn MessageRelay>, store: Arc<dyn SignalStore>) -> Self {
        Self {
            local_id,
            relay,
            store,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    pub fn local_id(&self) -> Uuid {
        self.local_id
    }

    /// Subscribe to a channel's topic and pump deliveries into `handler`
    ///
    /// Messages whose sender is the local participant never reach the
    /// handler. Deliveries for one channel are processed sequentially, which
    /// preserves the relay's per-sender ordering.
    pub async fn subscribe(
        &self,
        channel_id: &str,
        handler: Arc<dyn SignalHandler>,
    ) -> Result<(), SignalingError> {
        let mut rx = self
            .relay
            .subscribe(&channel_topic(channel_id))
            .await
            .map_err(|e| SignalingError::SubscribeFailed(e.to_string()))?;

        let local_id = self.local_id;
        let channel = channel_id.to_string();
        let task = tokio::spawn(async move {
            while let Some(value) = rx.recv().await {
                let msg: SignalMessage = match serde_json::from_value(value) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!("Invalid signaling payload on {}: {}", channel, e);
                        continue;
                    }
                };
                if msg.sender_id == local_id {
                    continue;
                }
                handler.on_signal(msg).await;
            }
        });

        if let Some(old) = self
            .subscriptions
            .lock()
            .insert(channel_id.to_string(), task)
        {
            old.abort();
        }
        debug!("Subscribed signaling for channel {}", channel_id);
        Ok(())
    }

    /// Persist and publish one negotiation step
    ///
    /// `receiver_id: None` broadcasts to the channel. Failures are surfaced
    /// as retryable `SendFailed`; the caller may re-attempt the step.
    pub async fn send(
        &self,
        channel_id: &str,
        receiver_id: Option<Uuid>,
        payload: SignalPayload,
    ) -> Result<(), SignalingError> {
        let msg = SignalMessage {
            channel_id: channel_id.to_string(),
            sender_id: self.local_id,
            receiver_id,
            payload,
        };

        let record = SignalRecord::from_message(&msg, epoch_ms(), Some(SIGNAL_TTL_MS))?;
        self.store
            .insert(record)
            .await
            .map_err(|e| SignalingError::SendFailed(e.to_string()))?;

        let value = serde_json::to_value(&msg)?;
        self.relay
            .publish(&channel_topic(channel_id), value)
            .await
            .map_err(|e| SignalingError::SendFailed(e.to_string()))?;

        Ok(())
    }

    /// Tear down the channel subscription; no handler invocations are
    /// started after this returns
    pub fn unsubscribe(&self, channel_id: &str) {
        if let Some(task) = self.subscriptions.lock().remove(channel_id) {
            task.abort();
            debug!("Unsubscribed signaling for channel {}", channel_id);
        }
    }
}

impl Drop for SignalingTransport {
    fn drop(&mut self) {
        for (_, task) in self.subscriptions.lock().drain() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::message::IceCandidate;
    use crate::signaling::relay::InMemoryRelay;
    use crate::signaling::store::InMemorySignalStore;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct CollectingHandler {
        tx: mpsc::UnboundedSender<SignalMessage>,
    }

    #[async_trait]
    impl SignalHandler for CollectingHandler {
        async fn on_signal(&self, msg: SignalMessage) {
            let _ = self.tx.send(msg);
        }
    }

    struct FailingRelay;

    #[async_trait]
    impl MessageRelay for FailingRelay {
        async fn publish(
            &self,
            _topic: &str,
            _payload: serde_json::Value,
        ) -> Result<(), SignalingError> {
            Err(SignalingError::RelayConnection("relay down".into()))
        }

        async fn subscribe(
            &self,
            _topic: &str,
        ) -> Result<mpsc::UnboundedReceiver<serde_json::Value>, SignalingError> {
            Err(SignalingError::RelayConnection("relay down".into()))
        }
    }

    fn ice_payload() -> SignalPayload {
        SignalPayload::IceCandidate(IceCandidate::new("cand"))
    }

    #[tokio::test]
    async fn test_self_originated_messages_filtered() {
        let relay = Arc::new(InMemoryRelay::new());
        let store = Arc::new(InMemorySignalStore::new());
        let local = Uuid::new_v4();
        let remote = Uuid::new_v4();

        let local_transport = SignalingTransport::new(local, relay.clone(), store.clone());
        let remote_transport = SignalingTransport::new(remote, relay.clone(), store.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        local_transport
            .subscribe("c1", Arc::new(CollectingHandler { tx }))
            .await
            .unwrap();

        // Own message must never come back; remote message must arrive
        local_transport.send("c1", None, ice_payload()).await.unwrap();
        remote_transport.send("c1", None, ice_payload()).await.unwrap();

        let delivered = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered.sender_id, remote);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_persists_record() {
        let relay = Arc::new(InMemoryRelay::new());
        let store = Arc::new(InMemorySignalStore::new());
        let transport = SignalingTransport::new(Uuid::new_v4(), relay, store.clone());

        transport.send("c1", None, ice_payload()).await.unwrap();

        let rows = store.rows_for("c1");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, "ice-candidate");
        assert!(rows[0].expires_at.is_some());
    }

    #[tokio::test]
    async fn test_send_failure_surfaced_as_retryable() {
        let store = Arc::new(InMemorySignalStore::new());
        let transport = SignalingTransport::new(Uuid::new_v4(), Arc::new(FailingRelay), store);

        let err = transport.send("c1", None, ice_payload()).await.unwrap_err();
        assert!(matches!(err, SignalingError::SendFailed(_)));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let relay = Arc::new(InMemoryRelay::new());
        let store = Arc::new(InMemorySignalStore::new());
        let local = Uuid::new_v4();
        let remote = Uuid::new_v4();

        let local_transport = SignalingTransport::new(local, relay.clone(), store.clone());
        let remote_transport = SignalingTransport::new(remote, relay.clone(), store);

        let (tx, mut rx) = mpsc::unbounded_channel();
        local_transport
            .subscribe("c1", Arc::new(CollectingHandler { tx }))
            .await
            .unwrap();
        local_transport.unsubscribe("c1");

        remote_transport.send("c1", None, ice_payload()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }
}
