//! Local media acquisition and mute control

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::error::MediaError;
use super::stream::AudioStream;

/// An open capture session feeding an [`AudioStream`]
pub trait CaptureSession: Send + Sync {
    fn stream(&self) -> Arc<AudioStream>;
    fn stop(&self);
}

/// Platform microphone-capture capability
pub trait MediaCapture: Send + Sync {
    /// Open the capture device; fails with `MediaError::Unavailable` when
    /// the platform denies or lacks a device
    fn open(&self) -> Result<Box<dyn CaptureSession>, MediaError>;
}

/// Capture backend that produces no samples, for headless hosts and tests
pub struct NullCapture;

struct NullSession {
    stream: Arc<AudioStream>,
}

impl CaptureSession for NullSession {
    fn stream(&self) -> Arc<AudioStream> {
        self.stream.clone()
    }

    fn stop(&self) {}
}

impl MediaCapture for NullCapture {
    fn open(&self) -> Result<Box<dyn CaptureSession>, MediaError> {
        Ok(Box::new(NullSession {
            stream: AudioStream::new(),
        }))
    }
}

/// Owns the local capture stream for one participant
///
/// The stream is shared read-only across all peer links; only this
/// controller stops or replaces it.
pub struct LocalMediaController {
    capture: Arc<dyn MediaCapture>,
    session: Mutex<Option<Box<dyn CaptureSession>>>,
}

impl LocalMediaController {
    pub fn new(capture: Arc<dyn MediaCapture>) -> Self {
        Self {
            capture,
            session: Mutex::new(None),
        }
    }

    /// Acquire the local audio stream, opening the device if needed
    pub fn acquire(&self) -> Result<Arc<AudioStream>, MediaError> {
        let mut session = self.session.lock();
        if let Some(ref active) = *session {
            return Ok(active.stream());
        }

        let active = self.capture.open()?;
        let stream = active.stream();
        *session = Some(active);
        info!("Local media acquired");
        Ok(stream)
    }

    /// The active stream, if media has been acquired
    pub fn stream(&self) -> Option<Arc<AudioStream>> {
        self.session.lock().as_ref().map(|s| s.stream())
    }

    /// Toggle `enabled` on every local audio track; no renegotiation
    pub fn set_muted(&self, muted: bool) {
        if let Some(ref session) = *self.session.lock() {
            for track in session.stream().tracks() {
                track.set_enabled(!muted);
            }
            debug!("Local media {}", if muted { "muted" } else { "unmuted" });
        }
    }

    pub fn is_muted(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .map(|s| s.stream().tracks().iter().all(|t| !t.is_enabled()))
            .unwrap_or(false)
    }

    /// Stop every track and release the device; idempotent
    pub fn release(&self) {
        if let Some(session) = self.session.lock().take() {
            session.stop();
            info!("Local media released");
        }
    }
}
