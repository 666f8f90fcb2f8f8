//! Per-peer link state

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::task::JoinHandle;
use uuid::Uuid;

use super::transport::PeerTransport;
use crate::media::AudioStream;
use crate::signaling::{IceCandidate, SessionDescription};

/// Negotiation state of a peer link
///
/// ```text
/// Idle --> Negotiating: transport created
/// Negotiating --> Connected: remote track observed
/// Negotiating --> Failed: connectivity failure
/// Connected --> Failed: connectivity failure
/// Negotiating --> Closed: teardown
/// Connected --> Closed: teardown
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No transport object exists yet; the implicit state of any remote
    /// the manager holds no link for
    Idle,
    /// Descriptions are being exchanged
    Negotiating,
    /// Remote media track observed at least once
    Connected,
    /// Unrecoverable connectivity failure; link is removed
    Failed,
    /// Explicit teardown
    Closed,
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

/// One link toward a remote participant, owned by the connection manager
///
/// Never shared across channels; all mutation goes through the manager.
pub(crate) struct PeerLink {
    pub remote_id: Uuid,
    pub state: LinkState,
    pub transport: Box<dyn PeerTransport>,
    /// Candidates received before a remote description existed, FIFO
    pub pending_candidates: VecDeque<IceCandidate>,
    /// Outstanding local offer, kept for answer matching and glare
    pub local_offer: Option<SessionDescription>,
    pub remote_description_set: bool,
    pub remote_stream: Option<Arc<AudioStream>>,
    pub event_task: Option<JoinHandle<()>>,
}

impl PeerLink {
    pub fn new(remote_id: Uuid, transport: Box<dyn PeerTransport>) -> Self {
        Self {
            remote_id,
            state: LinkState::Negotiating,
            transport,
            pending_candidates: VecDeque::new(),
            local_offer: None,
            remote_description_set: false,
            remote_stream: None,
            event_task: None,
        }
    }
}
