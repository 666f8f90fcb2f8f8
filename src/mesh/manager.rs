//! Peer connection management
//!
//! Owns one transport object per remote participant. The link map and the
//! per-link candidate queues are mutated only through this manager, behind a
//! single async mutex, so interleaved negotiation steps for different links
//! never observe partial transitions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::MeshError;
use super::link::{LinkState, PeerLink};
use super::transport::{TransportEvent, TransportFactory};
use crate::media::AudioStream;
use crate::signaling::{IceCandidate, SessionDescription, SignalPayload, SignalingTransport};
use crate::traversal::IceDescriptor;

/// UI-facing link lifecycle events
#[derive(Debug, Clone)]
pub enum MeshEvent {
    /// Remote media arrived; the stream can be fed to an activity analyzer
    PeerConnected {
        remote_id: Uuid,
        stream: Arc<AudioStream>,
    },
    /// The link failed and was removed; the rest of the mesh keeps running
    PeerFailed { remote_id: Uuid },
    /// The link was torn down deliberately
    PeerClosed { remote_id: Uuid },
}

/// Owns and serializes all peer links for one channel session
pub struct PeerConnectionManager {
    channel_id: String,
    local_id: Uuid,
    links: Mutex<HashMap<Uuid, PeerLink>>,
    factory: Arc<dyn TransportFactory>,
    signaling: Arc<SignalingTransport>,
    local_stream: Option<Arc<AudioStream>>,
    ice_servers: Vec<IceDescriptor>,
    events: mpsc::UnboundedSender<MeshEvent>,
    /// Set by `close_all`; late signaling must not resurrect links
    closed: AtomicBool,
}

impl PeerConnectionManager {
    /// Create a manager for one channel session
    ///
    /// Returns the manager and the receiver of UI-facing events.
    pub fn new(
        channel_id: &str,
        local_id: Uuid,
        factory: Arc<dyn TransportFactory>,
        signaling: Arc<SignalingTransport>,
        local_stream: Option<Arc<AudioStream>>,
        ice_servers: Vec<IceDescriptor>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<MeshEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            channel_id: channel_id.to_string(),
            local_id,
            links: Mutex::new(HashMap::new()),
            factory,
            signaling,
            local_stream,
            ice_servers,
            events,
            closed: AtomicBool::new(false),
        });
        (manager, events_rx)
    }

    pub fn local_id(&self) -> Uuid {
        self.local_id
    }

    /// Construct a transport and wire its event pump for a new remote
    async fn ensure_link<'a>(
        self: &Arc<Self>,
        links: &'a mut HashMap<Uuid, PeerLink>,
        remote_id: Uuid,
    ) -> Result<&'a mut PeerLink, MeshError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MeshError::Transport(
                "connection manager is closed".to_string(),
            ));
        }
        match links.entry(remote_id) {
            std::collections::hash_map::Entry::Occupied(entry) => Ok(entry.into_mut()),
            std::collections::hash_map::Entry::Vacant(entry) => {
                let (event_tx, event_rx) = mpsc::unbounded_channel();
                let transport = self
                    .factory
                    .create(remote_id, &self.ice_servers, event_tx)
                    .await?;

                if let Some(ref stream) = self.local_stream {
                    for track in stream.tracks() {
                        transport.attach_track(track.clone());
                    }
                }

                let mut link = PeerLink::new(remote_id, transport);
                link.event_task = Some(tokio::spawn(
                    self.clone().pump_transport_events(remote_id, event_rx),
                ));
                debug!("Created peer link for {}", remote_id);
                Ok(entry.insert(link))
            }
        }
    }

    /// Create an outbound offer for `remote_id`, building the link if needed
    ///
    /// The offer is recorded as outstanding for answer matching and glare
    /// resolution; the caller sends it over signaling.
    pub async fn begin_offer(
        self: &Arc<Self>,
        remote_id: Uuid,
    ) -> Result<SessionDescription, MeshError> {
        let mut links = self.links.lock().await;
        let link = self.ensure_link(&mut links, remote_id).await?;

        let offer = link.transport.create_offer().await?;
        link.transport.set_local_description(offer.clone()).await?;
        link.local_offer = Some(offer.clone());
        link.state = LinkState::Negotiating;
        Ok(offer)
    }

    /// Apply an inbound offer and synthesize the answer
    ///
    /// Returns `None` when the offer loses glare resolution and is
    /// discarded: with a local offer outstanding, the participant whose id
    /// sorts greater is the de-facto offerer.
    pub async fn accept_offer(
        self: &Arc<Self>,
        remote_id: Uuid,
        offer: SessionDescription,
    ) -> Result<Option<SessionDescription>, MeshError> {
        let mut links = self.links.lock().await;
        let link = self.ensure_link(&mut links, remote_id).await?;

        if link.local_offer.is_some() {
            if self.local_id > remote_id {
                debug!(
                    "Glare with {}: keeping local offer, discarding incoming",
                    remote_id
                );
                return Ok(None);
            }
            debug!("Glare with {}: discarding local offer", remote_id);
            link.local_offer = None;
        }

        let bundled = offer.candidates.clone();
        link.transport.set_remote_description(offer).await?;
        link.remote_description_set = true;
        apply_candidates(link, bundled).await;

        let answer = link.transport.create_answer().await?;
        link.transport
            .set_local_description(answer.clone())
            .await?;

        let pending: Vec<IceCandidate> = link.pending_candidates.drain(..).collect();
        apply_candidates(link, pending).await;

        Ok(Some(answer))
    }

    /// Apply an inbound answer to the matching outstanding offer
    ///
    /// Returns false when no local offer is outstanding; the answer is
    /// stale or duplicate and must be discarded, not treated as an error.
    pub async fn accept_answer(
        self: &Arc<Self>,
        remote_id: Uuid,
        answer: SessionDescription,
    ) -> Result<bool, MeshError> {
        let mut links = self.links.lock().await;
        let link = match links.get_mut(&remote_id) {
            Some(link) if link.local_offer.is_some() => link,
            _ => return Ok(false),
        };

        let bundled = answer.candidates.clone();
        link.transport.set_remote_description(answer).await?;
        link.remote_description_set = true;
        link.local_offer = None;
        apply_candidates(link, bundled).await;

        let pending: Vec<IceCandidate> = link.pending_candidates.drain(..).collect();
        apply_candidates(link, pending).await;

        Ok(true)
    }

    /// Apply a candidate now, or queue it until a remote description exists
    ///
    /// Candidates may arrive before the offer; the link is created lazily.
    pub async fn add_remote_candidate(
        self: &Arc<Self>,
        remote_id: Uuid,
        candidate: IceCandidate,
    ) -> Result<(), MeshError> {
        let mut links = self.links.lock().await;
        let link = self.ensure_link(&mut links, remote_id).await?;

        if link.remote_description_set {
            apply_candidates(link, vec![candidate]).await;
        } else {
            link.pending_candidates.push_back(candidate);
        }
        Ok(())
    }

    /// Close one link and remove it, emitting `PeerClosed`
    pub async fn close_link(&self, remote_id: Uuid) {
        let mut links = self.links.lock().await;
        if let Some(mut link) = links.remove(&remote_id) {
            link.state = LinkState::Closed;
            link.transport.close().await;
            if let Some(task) = link.event_task.take() {
                task.abort();
            }
            info!("Closed peer link for {}", remote_id);
            let _ = self.events.send(MeshEvent::PeerClosed { remote_id });
        }
    }

    /// Close every link and clear the map; idempotent
    ///
    /// After this, no new links are created for late signaling.
    pub async fn close_all(&self) {
        let mut links = self.links.lock().await;
        self.closed.store(true, Ordering::SeqCst);
        for (remote_id, mut link) in links.drain() {
            link.state = LinkState::Closed;
            link.transport.close().await;
            if let Some(task) = link.event_task.take() {
                task.abort();
            }
            debug!("Closed peer link for {}", remote_id);
        }
    }

    pub async fn link_count(&self) -> usize {
        self.links.lock().await.len()
    }

    pub async fn link_state(&self, remote_id: Uuid) -> Option<LinkState> {
        self.links.lock().await.get(&remote_id).map(|l| l.state)
    }

    pub async fn remote_stream(&self, remote_id: Uuid) -> Option<Arc<AudioStream>> {
        self.links
            .lock()
            .await
            .get(&remote_id)
            .and_then(|l| l.remote_stream.clone())
    }

    async fn pump_transport_events(
        self: Arc<Self>,
        remote_id: Uuid,
        mut rx: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        while let Some(event) = rx.recv().await {
            match event {
                TransportEvent::CandidateGathered(candidate) => {
                    if let Err(e) = self
                        .signaling
                        .send(
                            &self.channel_id,
                            Some(remote_id),
                            SignalPayload::IceCandidate(candidate),
                        )
                        .await
                    {
                        warn!("Failed to send ICE candidate to {}: {}", remote_id, e);
                    }
                }
                TransportEvent::TrackReceived(stream) => {
                    self.on_track_received(remote_id, stream).await;
                }
                TransportEvent::ConnectivityFailed => {
                    self.on_connectivity_failed(remote_id).await;
                    break;
                }
            }
        }
    }

    async fn on_track_received(&self, remote_id: Uuid, stream: Arc<AudioStream>) {
        let mut links = self.links.lock().await;
        if let Some(link) = links.get_mut(&remote_id) {
            if link.state.is_terminal() {
                return;
            }
            link.state = LinkState::Connected;
            link.remote_stream = Some(stream.clone());
            info!("Peer link {} connected", remote_id);
            let _ = self
                .events
                .send(MeshEvent::PeerConnected { remote_id, stream });
        }
    }

    /// Unrecoverable transport failure: close, remove, notify. The other
    /// links keep operating.
    async fn on_connectivity_failed(&self, remote_id: Uuid) {
        let mut links = self.links.lock().await;
        if let Some(mut link) = links.remove(&remote_id) {
            link.state = LinkState::Failed;
            link.transport.close().await;
            warn!("Peer link {} failed, removed from mesh", remote_id);
            let _ = self.events.send(MeshEvent::PeerFailed { remote_id });
        }
    }
}

/// Apply candidates in arrival order; a failing candidate is logged and
/// skipped, ICE self-heals with the remaining ones
async fn apply_candidates(link: &mut PeerLink, candidates: Vec<IceCandidate>) {
    for candidate in candidates {
        if let Err(e) = link.transport.add_ice_candidate(candidate).await {
            warn!(
                "Skipping ICE candidate for {} that failed to apply: {}",
                link.remote_id, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::loopback::{LoopbackFactory, LoopbackNetwork};
    use crate::signaling::{InMemoryRelay, InMemorySignalStore, SdpType};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn signaling_for(local_id: Uuid) -> Arc<SignalingTransport> {
        Arc::new(SignalingTransport::new(
            local_id,
            Arc::new(InMemoryRelay::new()),
            Arc::new(InMemorySignalStore::new()),
        ))
    }

    fn manager_for(
        local_id: Uuid,
        network: &Arc<LoopbackNetwork>,
    ) -> (Arc<PeerConnectionManager>, UnboundedReceiver<MeshEvent>) {
        PeerConnectionManager::new(
            "c1",
            local_id,
            LoopbackFactory::new(network.clone(), local_id),
            signaling_for(local_id),
            None,
            Vec::new(),
        )
    }

    /// Build a remote-side transport and hand back it plus its offer
    async fn remote_offer(
        network: &Arc<LoopbackNetwork>,
        remote_id: Uuid,
        toward: Uuid,
    ) -> (Box<dyn crate::mesh::PeerTransport>, SessionDescription) {
        let factory = LoopbackFactory::new(network.clone(), remote_id);
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = factory.create(toward, &[], tx).await.unwrap();
        let offer = transport.create_offer().await.unwrap();
        assert_eq!(offer.kind, SdpType::Offer);
        (transport, offer)
    }

    #[tokio::test]
    async fn test_early_candidates_replayed_in_fifo_order() {
        let network = LoopbackNetwork::new();
        let local = Uuid::new_v4();
        let remote = Uuid::new_v4();
        let (manager, _events) = manager_for(local, &network);

        // Candidates arrive before any description: queued, not applied
        manager
            .add_remote_candidate(remote, IceCandidate::new("loopback one"))
            .await
            .unwrap();
        manager
            .add_remote_candidate(remote, IceCandidate::new("loopback two"))
            .await
            .unwrap();
        assert!(network.applied_candidates(local, remote).is_empty());

        let (_remote_transport, offer) = remote_offer(&network, remote, local).await;
        let answer = manager.accept_offer(remote, offer).await.unwrap();
        assert!(answer.is_some());

        assert_eq!(
            network.applied_candidates(local, remote),
            vec!["loopback one".to_string(), "loopback two".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failing_candidate_skipped_not_fatal() {
        let network = LoopbackNetwork::new();
        let local = Uuid::new_v4();
        let remote = Uuid::new_v4();
        let (manager, _events) = manager_for(local, &network);

        manager
            .add_remote_candidate(remote, IceCandidate::new("garbage"))
            .await
            .unwrap();
        manager
            .add_remote_candidate(remote, IceCandidate::new("loopback good"))
            .await
            .unwrap();

        let (_remote_transport, offer) = remote_offer(&network, remote, local).await;
        manager.accept_offer(remote, offer).await.unwrap();

        // The malformed candidate is skipped, the good one applied
        assert_eq!(
            network.applied_candidates(local, remote),
            vec!["loopback good".to_string()]
        );
    }

    #[tokio::test]
    async fn test_glare_greater_id_keeps_local_offer() {
        let network = LoopbackNetwork::new();
        let greater = Uuid::from_u128(2);
        let lesser = Uuid::from_u128(1);

        let (manager, _events) = manager_for(greater, &network);
        manager.begin_offer(lesser).await.unwrap();

        let (_remote_transport, offer) = remote_offer(&network, lesser, greater).await;
        let reply = manager.accept_offer(lesser, offer).await.unwrap();
        assert!(reply.is_none());
        assert_eq!(manager.link_count().await, 1);
    }

    #[tokio::test]
    async fn test_glare_lesser_id_discards_local_offer_and_answers() {
        let network = LoopbackNetwork::new();
        let greater = Uuid::from_u128(2);
        let lesser = Uuid::from_u128(1);

        let (manager, _events) = manager_for(lesser, &network);
        manager.begin_offer(greater).await.unwrap();

        let (_remote_transport, offer) = remote_offer(&network, greater, lesser).await;
        let reply = manager.accept_offer(greater, offer).await.unwrap();
        assert!(reply.is_some());
        assert_eq!(reply.unwrap().kind, SdpType::Answer);
        assert_eq!(manager.link_count().await, 1);

        // The discarded local offer no longer matches answers
        let stale = SessionDescription {
            kind: SdpType::Answer,
            sdp: Uuid::new_v4().to_string(),
            candidates: vec![],
        };
        assert!(!manager.accept_answer(greater, stale).await.unwrap());
    }

    #[tokio::test]
    async fn test_answer_without_outstanding_offer_discarded() {
        let network = LoopbackNetwork::new();
        let (manager, _events) = manager_for(Uuid::new_v4(), &network);

        let stale = SessionDescription {
            kind: SdpType::Answer,
            sdp: Uuid::new_v4().to_string(),
            candidates: vec![],
        };
        let applied = manager.accept_answer(Uuid::new_v4(), stale).await.unwrap();
        assert!(!applied);
        // No link is created for a stale answer
        assert_eq!(manager.link_count().await, 0);
    }

    #[tokio::test]
    async fn test_close_all_idempotent_and_clears_links() {
        let network = LoopbackNetwork::new();
        let local = Uuid::new_v4();
        let (manager, _events) = manager_for(local, &network);

        manager.begin_offer(Uuid::new_v4()).await.unwrap();
        manager.begin_offer(Uuid::new_v4()).await.unwrap();
        assert_eq!(manager.link_count().await, 2);
        assert_eq!(network.endpoint_count(), 2);

        manager.close_all().await;
        assert_eq!(manager.link_count().await, 0);
        assert_eq!(network.endpoint_count(), 0);

        manager.close_all().await;
        assert_eq!(manager.link_count().await, 0);
    }

    #[tokio::test]
    async fn test_late_signaling_after_close_all_creates_no_links() {
        let network = LoopbackNetwork::new();
        let local = Uuid::new_v4();
        let remote = Uuid::new_v4();
        let (manager, _events) = manager_for(local, &network);

        manager.begin_offer(remote).await.unwrap();
        manager.close_all().await;

        // A straggler candidate or offer must not resurrect the link
        let err = manager
            .add_remote_candidate(remote, IceCandidate::new("loopback late"))
            .await
            .unwrap_err();
        assert!(matches!(err, MeshError::Transport(_)));

        let (_remote_transport, offer) = remote_offer(&network, remote, local).await;
        assert!(manager.accept_offer(remote, offer).await.is_err());

        assert_eq!(manager.link_count().await, 0);
        // Only the straggler's own endpoint remains registered
        assert_eq!(network.endpoint_count(), 1);
    }
}
