//! Engine wiring and the caller-facing session surface
//!
//! `VoiceEngine` owns one channel session at a time: it sequences the join
//! and leave steps across media, presence, signaling, and the peer mesh, and
//! hands the caller a `MeshEvent` stream for UI updates.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::identity::{IdentityProvider, Participant};
use crate::media::{LocalMediaController, MediaCapture};
use crate::mesh::{
    LinkState, MeshEvent, NegotiationProtocol, PeerConnectionManager, TransportFactory,
};
use crate::presence::{PresenceStore, SessionPresenceTracker};
use crate::signaling::{MessageRelay, SignalStore, SignalingTransport};
use crate::traversal::{TraversalConfigProvider, TraversalConfigSource};

/// Session timing knobs
///
/// The staleness threshold has no safe default: it must exceed the heartbeat
/// interval by enough slack for the deployment's storage latency, so the
/// caller always chooses it.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Presence heartbeat period while connected
    pub heartbeat_interval: Duration,
    /// Age beyond which a presence row is treated as a vanished participant
    pub staleness_threshold: Duration,
}

impl EngineConfig {
    pub fn new(staleness_threshold: Duration) -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            staleness_threshold,
        }
    }
}

/// External capabilities the engine is wired with
pub struct EngineDeps {
    pub identity: Arc<dyn IdentityProvider>,
    pub relay: Arc<dyn MessageRelay>,
    pub signal_store: Arc<dyn SignalStore>,
    pub presence_store: Arc<dyn PresenceStore>,
    pub traversal: Arc<dyn TraversalConfigSource>,
    pub capture: Arc<dyn MediaCapture>,
    pub transports: Arc<dyn TransportFactory>,
}

struct ActiveSession {
    channel_id: String,
    tracker: SessionPresenceTracker,
    manager: Arc<PeerConnectionManager>,
    // Kept alive for the signaling subscription's handler
    _negotiation: Arc<NegotiationProtocol>,
}

/// One participant's voice engine
pub struct VoiceEngine {
    config: EngineConfig,
    local: Participant,
    presence_store: Arc<dyn PresenceStore>,
    transports: Arc<dyn TransportFactory>,
    signaling: Arc<SignalingTransport>,
    traversal: Arc<dyn TraversalConfigSource>,
    media: LocalMediaController,
    session: Mutex<Option<ActiveSession>>,
}

impl VoiceEngine {
    pub fn new(config: EngineConfig, deps: EngineDeps) -> Self {
        let local = deps.identity.current_user();
        let signaling = Arc::new(SignalingTransport::new(
            local.user_id,
            deps.relay,
            deps.signal_store,
        ));
        Self {
            config,
            local,
            presence_store: deps.presence_store,
            transports: deps.transports,
            signaling,
            traversal: deps.traversal,
            media: LocalMediaController::new(deps.capture),
            session: Mutex::new(None),
        }
    }

    pub fn local_participant(&self) -> &Participant {
        &self.local
    }

    /// Join a voice channel and start building the mesh
    ///
    /// Sequence: acquire media, publish Connecting, subscribe signaling,
    /// offer to every already-present remote, publish Connected. Returns the
    /// event stream for this session. Fails with `AlreadyJoined` while a
    /// session is active.
    pub async fn join(
        &self,
        channel_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<MeshEvent>, EngineError> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Err(EngineError::AlreadyJoined);
        }

        let stream = self.media.acquire()?;

        let tracker = SessionPresenceTracker::new(
            channel_id,
            self.local.user_id,
            self.presence_store.clone(),
            self.config.heartbeat_interval,
            self.config.staleness_threshold,
        );
        if let Err(e) = tracker.join().await {
            self.media.release();
            return Err(e.into());
        }

        // One provider per join: the ICE set is cached for this session only
        let ice_servers = TraversalConfigProvider::new(self.traversal.clone())
            .fetch()
            .await;
        let (manager, events_rx) = PeerConnectionManager::new(
            channel_id,
            self.local.user_id,
            self.transports.clone(),
            self.signaling.clone(),
            Some(stream),
            ice_servers,
        );
        let negotiation = NegotiationProtocol::new(
            channel_id,
            self.local.user_id,
            manager.clone(),
            self.signaling.clone(),
        );

        if let Err(e) = self
            .signaling
            .subscribe(channel_id, negotiation.clone())
            .await
        {
            if let Err(pe) = tracker.leave().await {
                warn!("Presence rollback failed: {}", pe);
            }
            self.media.release();
            return Err(e.into());
        }

        // Offer to everyone already in the channel. A failed send only
        // delays that one link; the remote will offer to us on its side.
        match tracker.remote_participants().await {
            Ok(remotes) => {
                for remote in remotes {
                    if let Err(e) = negotiation.send_offer_to(remote.user_id).await {
                        warn!("Join offer to {} failed: {}", remote.user_id, e);
                    }
                }
            }
            Err(e) => warn!("Presence listing failed during join: {}", e),
        }

        tracker.mark_connected().await?;
        info!("Joined channel {}", channel_id);

        *session = Some(ActiveSession {
            channel_id: channel_id.to_string(),
            tracker,
            manager,
            _negotiation: negotiation,
        });
        Ok(events_rx)
    }

    /// Leave the current channel; idempotent
    ///
    /// Presence goes Disconnected before links close, so remotes stop
    /// offering to a participant that is tearing down.
    pub async fn leave(&self) {
        let Some(active) = self.session.lock().await.take() else {
            return;
        };

        if let Err(e) = active.tracker.leave().await {
            warn!("Presence leave failed: {}", e);
        }
        active.manager.close_all().await;
        self.media.release();
        self.signaling.unsubscribe(&active.channel_id);
        info!("Left channel {}", active.channel_id);
    }

    /// Mute or unmute the local microphone; takes effect on every link
    pub async fn set_muted(&self, muted: bool) {
        self.media.set_muted(muted);
        if let Some(ref active) = *self.session.lock().await {
            if let Err(e) = active.tracker.set_muted(muted).await {
                warn!("Presence mute update failed: {}", e);
            }
        }
    }

    pub async fn set_deafened(&self, deafened: bool) {
        if let Some(ref active) = *self.session.lock().await {
            if let Err(e) = active.tracker.set_deafened(deafened).await {
                warn!("Presence deafen update failed: {}", e);
            }
        }
    }

    /// Tear down one peer link without leaving the channel
    pub async fn drop_peer(&self, remote_id: Uuid) {
        if let Some(ref active) = *self.session.lock().await {
            active.manager.close_link(remote_id).await;
        }
    }

    pub async fn peer_count(&self) -> usize {
        match *self.session.lock().await {
            Some(ref active) => active.manager.link_count().await,
            None => 0,
        }
    }

    pub async fn link_state(&self, remote_id: Uuid) -> Option<LinkState> {
        match *self.session.lock().await {
            Some(ref active) => active.manager.link_state(remote_id).await,
            None => None,
        }
    }

    pub fn is_muted(&self) -> bool {
        self.media.is_muted()
    }
}
