//! In-process peer transport
//!
//! Implements the [`PeerTransport`] capability without any platform stack:
//! descriptions name in-process endpoints and a link "connects" once both
//! sides have applied each other's description and at least one candidate.
//! Used by the scenario tests and for UI development without a WebRTC
//! runtime. Supports both trickle and bundled-candidate modes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::error::MeshError;
use super::transport::{PeerTransport, TransportEvent, TransportFactory};
use crate::media::{AudioStream, AudioTrack};
use crate::signaling::{IceCandidate, SdpType, SessionDescription};
use crate::traversal::IceDescriptor;

struct Endpoint {
    events: mpsc::UnboundedSender<TransportEvent>,
    remote_endpoint: Option<Uuid>,
    candidate_applied: bool,
    track_emitted: bool,
    applied_candidates: Vec<String>,
}

impl Endpoint {
    fn ready(&self) -> bool {
        self.remote_endpoint.is_some() && self.candidate_applied
    }
}

/// Shared hub pairing loopback transports
#[derive(Default)]
pub struct LoopbackNetwork {
    endpoints: Mutex<HashMap<Uuid, Endpoint>>,
    /// (owner participant, remote participant) -> endpoint
    index: Mutex<HashMap<(Uuid, Uuid), Uuid>>,
}

impl LoopbackNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn register(
        &self,
        owner: Uuid,
        remote: Uuid,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Uuid {
        let endpoint_id = Uuid::new_v4();
        self.endpoints.lock().insert(
            endpoint_id,
            Endpoint {
                events,
                remote_endpoint: None,
                candidate_applied: false,
                track_emitted: false,
                applied_candidates: Vec::new(),
            },
        );
        self.index.lock().insert((owner, remote), endpoint_id);
        endpoint_id
    }

    fn set_remote(&self, endpoint_id: Uuid, remote_endpoint: Uuid) {
        if let Some(endpoint) = self.endpoints.lock().get_mut(&endpoint_id) {
            endpoint.remote_endpoint = Some(remote_endpoint);
        }
        self.try_establish(endpoint_id);
    }

    fn candidate_applied(&self, endpoint_id: Uuid, candidate: &str) {
        if let Some(endpoint) = self.endpoints.lock().get_mut(&endpoint_id) {
            endpoint.candidate_applied = true;
            endpoint.applied_candidates.push(candidate.to_string());
        }
        self.try_establish(endpoint_id);
    }

    /// Emit `TrackReceived` on both sides once the pair is mutually ready
    fn try_establish(&self, endpoint_id: Uuid) {
        let mut endpoints = self.endpoints.lock();

        let peer_id = match endpoints.get(&endpoint_id) {
            Some(ep) if ep.ready() && !ep.track_emitted => match ep.remote_endpoint {
                Some(peer_id) => peer_id,
                None => return,
            },
            _ => return,
        };
        match endpoints.get(&peer_id) {
            Some(peer) if peer.ready() && peer.remote_endpoint == Some(endpoint_id) => {}
            _ => return,
        }

        for id in [endpoint_id, peer_id] {
            if let Some(endpoint) = endpoints.get_mut(&id) {
                if !endpoint.track_emitted {
                    endpoint.track_emitted = true;
                    let _ = endpoint
                        .events
                        .send(TransportEvent::TrackReceived(AudioStream::new()));
                }
            }
        }
    }

    fn remove(&self, endpoint_id: Uuid) {
        self.endpoints.lock().remove(&endpoint_id);
        self.index.lock().retain(|_, ep| *ep != endpoint_id);
    }

    /// Inject an unrecoverable connectivity failure into one side of a link
    pub fn fail_link(&self, owner: Uuid, remote: Uuid) {
        let endpoint_id = self.index.lock().get(&(owner, remote)).copied();
        if let Some(endpoint_id) = endpoint_id {
            if let Some(endpoint) = self.endpoints.lock().get(&endpoint_id) {
                let _ = endpoint.events.send(TransportEvent::ConnectivityFailed);
            }
        }
    }

    /// Candidate strings applied by `owner`'s transport toward `remote`,
    /// in application order
    pub fn applied_candidates(&self, owner: Uuid, remote: Uuid) -> Vec<String> {
        let endpoint_id = match self.index.lock().get(&(owner, remote)).copied() {
            Some(id) => id,
            None => return Vec::new(),
        };
        self.endpoints
            .lock()
            .get(&endpoint_id)
            .map(|ep| ep.applied_candidates.clone())
            .unwrap_or_default()
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.lock().len()
    }
}

/// One in-process transport toward a single remote participant
pub struct LoopbackTransport {
    network: Arc<LoopbackNetwork>,
    endpoint: Uuid,
    trickle: bool,
    events: mpsc::UnboundedSender<TransportEvent>,
    tracks: Mutex<Vec<AudioTrack>>,
}

impl LoopbackTransport {
    fn description(&self, kind: SdpType) -> SessionDescription {
        let candidates = if self.trickle {
            Vec::new()
        } else {
            vec![IceCandidate::new(&format!("loopback {}", self.endpoint))]
        };
        SessionDescription {
            kind,
            sdp: self.endpoint.to_string(),
            candidates,
        }
    }
}

#[async_trait]
impl PeerTransport for LoopbackTransport {
    async fn create_offer(&self) -> Result<SessionDescription, MeshError> {
        Ok(self.description(SdpType::Offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MeshError> {
        Ok(self.description(SdpType::Answer))
    }

    async fn set_local_description(&self, _desc: SessionDescription) -> Result<(), MeshError> {
        if self.trickle {
            // Candidate gathering completes immediately in-process
            let _ = self
                .events
                .send(TransportEvent::CandidateGathered(IceCandidate::new(
                    &format!("loopback {}", self.endpoint),
                )));
        }
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), MeshError> {
        let remote_endpoint: Uuid = desc
            .sdp
            .parse()
            .map_err(|_| MeshError::Transport(format!("Unparseable description: {}", desc.sdp)))?;
        self.network.set_remote(self.endpoint, remote_endpoint);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MeshError> {
        if !candidate.candidate.starts_with("loopback") {
            return Err(MeshError::Transport(format!(
                "Unparseable candidate: {}",
                candidate.candidate
            )));
        }
        self.network
            .candidate_applied(self.endpoint, &candidate.candidate);
        Ok(())
    }

    fn attach_track(&self, track: AudioTrack) {
        self.tracks.lock().push(track);
    }

    fn supports_trickle(&self) -> bool {
        self.trickle
    }

    async fn close(&self) {
        self.network.remove(self.endpoint);
    }
}

/// Builds loopback transports for one participant
pub struct LoopbackFactory {
    network: Arc<LoopbackNetwork>,
    owner: Uuid,
    trickle: bool,
}

impl LoopbackFactory {
    pub fn new(network: Arc<LoopbackNetwork>, owner: Uuid) -> Arc<Self> {
        Arc::new(Self {
            network,
            owner,
            trickle: true,
        })
    }

    /// Bundle the candidate set into descriptions instead of trickling
    pub fn non_trickle(network: Arc<LoopbackNetwork>, owner: Uuid) -> Arc<Self> {
        Arc::new(Self {
            network,
            owner,
            trickle: false,
        })
    }
}

#[async_trait]
impl TransportFactory for LoopbackFactory {
    async fn create(
        &self,
        remote_id: Uuid,
        _ice_servers: &[IceDescriptor],
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Box<dyn PeerTransport>, MeshError> {
        let endpoint = self.network.register(self.owner, remote_id, events.clone());
        Ok(Box::new(LoopbackTransport {
            network: self.network.clone(),
            endpoint,
            trickle: self.trickle,
            events,
            tracks: Mutex::new(Vec::new()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn make_pair(
        trickle: bool,
    ) -> (
        Box<dyn PeerTransport>,
        mpsc::UnboundedReceiver<TransportEvent>,
        Box<dyn PeerTransport>,
        mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let network = LoopbackNetwork::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let factory_a = if trickle {
            LoopbackFactory::new(network.clone(), a)
        } else {
            LoopbackFactory::non_trickle(network.clone(), a)
        };
        let factory_b = if trickle {
            LoopbackFactory::new(network.clone(), b)
        } else {
            LoopbackFactory::non_trickle(network, b)
        };

        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        let ta = factory_a.create(b, &[], tx_a).await.unwrap();
        let tb = factory_b.create(a, &[], tx_b).await.unwrap();
        (ta, rx_a, tb, rx_b)
    }

    #[tokio::test]
    async fn test_pair_connects_after_descriptions_and_candidates() {
        let (ta, mut rx_a, tb, mut rx_b) = make_pair(true).await;

        let offer = ta.create_offer().await.unwrap();
        ta.set_local_description(offer.clone()).await.unwrap();
        tb.set_remote_description(offer).await.unwrap();

        let answer = tb.create_answer().await.unwrap();
        tb.set_local_description(answer.clone()).await.unwrap();
        ta.set_remote_description(answer).await.unwrap();

        // Exchange the gathered candidates
        let cand_a = match rx_a.recv().await.unwrap() {
            TransportEvent::CandidateGathered(c) => c,
            other => panic!("Unexpected event: {:?}", other),
        };
        let cand_b = match rx_b.recv().await.unwrap() {
            TransportEvent::CandidateGathered(c) => c,
            other => panic!("Unexpected event: {:?}", other),
        };
        tb.add_ice_candidate(cand_a).await.unwrap();
        ta.add_ice_candidate(cand_b).await.unwrap();

        assert!(matches!(
            rx_a.recv().await.unwrap(),
            TransportEvent::TrackReceived(_)
        ));
        assert!(matches!(
            rx_b.recv().await.unwrap(),
            TransportEvent::TrackReceived(_)
        ));
    }

    #[tokio::test]
    async fn test_non_trickle_bundles_candidates() {
        let (ta, mut rx_a, tb, mut rx_b) = make_pair(false).await;
        assert!(!ta.supports_trickle());

        let offer = ta.create_offer().await.unwrap();
        assert_eq!(offer.candidates.len(), 1);
        ta.set_local_description(offer.clone()).await.unwrap();

        tb.set_remote_description(offer.clone()).await.unwrap();
        for candidate in offer.candidates {
            tb.add_ice_candidate(candidate).await.unwrap();
        }

        let answer = tb.create_answer().await.unwrap();
        tb.set_local_description(answer.clone()).await.unwrap();
        ta.set_remote_description(answer.clone()).await.unwrap();
        for candidate in answer.candidates {
            ta.add_ice_candidate(candidate).await.unwrap();
        }

        assert!(matches!(
            rx_a.recv().await.unwrap(),
            TransportEvent::TrackReceived(_)
        ));
        assert!(matches!(
            rx_b.recv().await.unwrap(),
            TransportEvent::TrackReceived(_)
        ));
    }

    #[tokio::test]
    async fn test_malformed_candidate_rejected() {
        let (ta, _rx_a, _tb, _rx_b) = make_pair(true).await;
        let err = ta
            .add_ice_candidate(IceCandidate::new("not a candidate"))
            .await
            .unwrap_err();
        assert!(matches!(err, MeshError::Transport(_)));
    }

    #[tokio::test]
    async fn test_close_releases_endpoint() {
        let network = LoopbackNetwork::new();
        let factory = LoopbackFactory::new(network.clone(), Uuid::new_v4());
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = factory.create(Uuid::new_v4(), &[], tx).await.unwrap();

        assert_eq!(network.endpoint_count(), 1);
        transport.close().await;
        assert_eq!(network.endpoint_count(), 0);
    }
}
