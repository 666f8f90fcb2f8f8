//! Message relay interface and in-process implementation
//!
//! The relay is a topic-scoped publish/subscribe bus with at-least-once,
//! best-effort-live delivery. Ordering is only guaranteed between messages
//! from the same sender; the negotiation protocol tolerates interleaving.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::error::SignalingError;

/// A topic-scoped publish/subscribe bus
///
/// A subscription ends when its receiver is dropped; publishers prune dead
/// subscribers on the next publish.
#[async_trait]
pub trait MessageRelay: Send + Sync {
    /// Publish a payload to every current subscriber of `topic`
    async fn publish(&self, topic: &str, payload: serde_json::Value)
        -> Result<(), SignalingError>;

    /// Subscribe to a topic; deliveries arrive on the returned receiver
    async fn subscribe(
        &self,
        topic: &str,
    ) -> Result<mpsc::UnboundedReceiver<serde_json::Value>, SignalingError>;
}

/// In-process relay backed by per-topic subscriber lists
///
/// Shared between engines in tests and single-process hosts.
#[derive(Default)]
pub struct InMemoryRelay {
    topics: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<serde_json::Value>>>>,
}

impl InMemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscribers on a topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .get(topic)
            .map(|subs| subs.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageRelay for InMemoryRelay {
    async fn publish(
        &self,
        topic: &str,
        payload: serde_json::Value,
    ) -> Result<(), SignalingError> {
        let mut topics = self.topics.lock();
        if let Some(subs) = topics.get_mut(topic) {
            subs.retain(|tx| tx.send(payload.clone()).is_ok());
            if subs.is_empty() {
                topics.remove(topic);
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
    ) -> Result<mpsc::UnboundedReceiver<serde_json::Value>, SignalingError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        debug!("Subscribed to topic {}", topic);
        Ok(rx)
    }
}
