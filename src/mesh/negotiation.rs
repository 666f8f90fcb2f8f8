//! Offer/answer handshake rules
//!
//! Roles are symmetric; any participant may initiate. The relay only
//! guarantees per-sender ordering, so glare (simultaneous offers) and stale
//! answers are normal conditions here, not errors.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::MeshError;
use super::manager::PeerConnectionManager;
use crate::signaling::{
    SessionDescription, SignalHandler, SignalMessage, SignalPayload, SignalingTransport,
};

/// Applies inbound signaling to the connection manager and replies
pub struct NegotiationProtocol {
    channel_id: String,
    local_id: Uuid,
    manager: Arc<PeerConnectionManager>,
    signaling: Arc<SignalingTransport>,
}

impl NegotiationProtocol {
    pub fn new(
        channel_id: &str,
        local_id: Uuid,
        manager: Arc<PeerConnectionManager>,
        signaling: Arc<SignalingTransport>,
    ) -> Arc<Self> {
        Arc::new(Self {
            channel_id: channel_id.to_string(),
            local_id,
            manager,
            signaling,
        })
    }

    /// Proactively offer to a remote participant (join-time mesh building)
    pub async fn send_offer_to(&self, remote_id: Uuid) -> Result<(), MeshError> {
        let offer = self.manager.begin_offer(remote_id).await?;
        self.signaling
            .send(
                &self.channel_id,
                Some(remote_id),
                SignalPayload::Offer(offer),
            )
            .await?;
        debug!("Sent offer to {}", remote_id);
        Ok(())
    }

    async fn handle_offer(
        &self,
        sender: Uuid,
        offer: SessionDescription,
    ) -> Result<(), MeshError> {
        match self.manager.accept_offer(sender, offer).await? {
            Some(answer) => {
                self.signaling
                    .send(&self.channel_id, Some(sender), SignalPayload::Answer(answer))
                    .await?;
                debug!("Answered offer from {}", sender);
            }
            None => {
                debug!("Discarded glare offer from {}", sender);
            }
        }
        Ok(())
    }

    async fn handle_answer(
        &self,
        sender: Uuid,
        answer: SessionDescription,
    ) -> Result<(), MeshError> {
        if !self.manager.accept_answer(sender, answer).await? {
            // Stale or duplicate; the relay is at-least-once
            debug!("Discarded answer from {} with no outstanding offer", sender);
        }
        Ok(())
    }
}

#[async_trait]
impl SignalHandler for NegotiationProtocol {
    async fn on_signal(&self, msg: SignalMessage) {
        if msg.channel_id != self.channel_id {
            return;
        }
        if let Some(receiver) = msg.receiver_id {
            if receiver != self.local_id {
                return;
            }
        }

        let sender = msg.sender_id;
        let result = match msg.payload {
            SignalPayload::Offer(desc) => self.handle_offer(sender, desc).await,
            SignalPayload::Answer(desc) => self.handle_answer(sender, desc).await,
            SignalPayload::IceCandidate(candidate) => {
                self.manager.add_remote_candidate(sender, candidate).await
            }
        };

        if let Err(e) = result {
            warn!("Negotiation step with {} failed: {}", sender, e);
        }
    }
}
