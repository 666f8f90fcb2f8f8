//! Peer transport capability
//!
//! The platform's NAT-traversal transport (a WebRTC peer connection or an
//! equivalent) is consumed through these traits. Transport-level events flow
//! back to the connection manager over an mpsc channel rather than through
//! inheritance or mixins.

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::error::MeshError;
use crate::media::{AudioStream, AudioTrack};
use crate::signaling::{IceCandidate, SessionDescription};
use crate::traversal::IceDescriptor;

/// Events a transport reports while negotiating and running
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A local ICE candidate became available (trickle mode)
    CandidateGathered(IceCandidate),
    /// The remote media track arrived; the link is usable
    TrackReceived(std::sync::Arc<AudioStream>),
    /// Unrecoverable connectivity failure
    ConnectivityFailed,
}

/// One NAT-traversal transport toward a single remote participant
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, MeshError>;
    async fn create_answer(&self) -> Result<SessionDescription, MeshError>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), MeshError>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), MeshError>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MeshError>;

    /// Attach a shared local track; called once per track at link creation
    fn attach_track(&self, track: AudioTrack);

    /// When false, descriptions carry the full candidate set and no
    /// `CandidateGathered` events are emitted
    fn supports_trickle(&self) -> bool;

    async fn close(&self);
}

/// Builds one transport per peer link
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        remote_id: Uuid,
        ice_servers: &[IceDescriptor],
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Box<dyn PeerTransport>, MeshError>;
}
