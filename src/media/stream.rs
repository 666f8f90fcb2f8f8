//! Audio streams and tracks
//!
//! An `AudioStream` is a handle shared between the producer of samples (a
//! capture backend or a peer transport) and pull-based consumers (the
//! activity analyzer). Samples cross the boundary through a lock-free ring
//! buffer; the mutexes only serialize same-side access.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use uuid::Uuid;

/// One second of mono 48 kHz audio
const STREAM_BUFFER_SAMPLES: usize = 48_000;

/// A single audio track with a renegotiation-free enable switch
///
/// Muting toggles `enabled`; producers drop samples for disabled tracks and
/// no SDP exchange is required.
#[derive(Debug, Clone)]
pub struct AudioTrack {
    id: Uuid,
    enabled: Arc<AtomicBool>,
}

impl AudioTrack {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

impl Default for AudioTrack {
    fn default() -> Self {
        Self::new()
    }
}

/// A local or remote audio stream
pub struct AudioStream {
    id: Uuid,
    tracks: Vec<AudioTrack>,
    producer: std::sync::Mutex<HeapProd<f32>>,
    consumer: std::sync::Mutex<HeapCons<f32>>,
}

impl AudioStream {
    /// Create a stream with a single audio track
    pub fn new() -> Arc<Self> {
        Self::with_tracks(vec![AudioTrack::new()])
    }

    pub fn with_tracks(tracks: Vec<AudioTrack>) -> Arc<Self> {
        let rb = HeapRb::<f32>::new(STREAM_BUFFER_SAMPLES);
        let (producer, consumer) = rb.split();
        Arc::new(Self {
            id: Uuid::new_v4(),
            tracks,
            producer: std::sync::Mutex::new(producer),
            consumer: std::sync::Mutex::new(consumer),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tracks(&self) -> &[AudioTrack] {
        &self.tracks
    }

    /// Append captured samples; returns the number accepted
    ///
    /// Uses try_lock so a real-time capture callback never blocks. Overflow
    /// drops the newest samples, which is acceptable for level metering.
    pub fn push_samples(&self, samples: &[f32]) -> usize {
        if let Ok(mut producer) = self.producer.try_lock() {
            let mut count = 0;
            for &sample in samples {
                if producer.try_push(sample).is_ok() {
                    count += 1;
                } else {
                    break;
                }
            }
            count
        } else {
            0
        }
    }

    /// Drain all buffered samples (pull side)
    pub fn drain_samples(&self) -> Vec<f32> {
        let mut out = Vec::new();
        if let Ok(mut consumer) = self.consumer.lock() {
            while let Some(sample) = consumer.try_pop() {
                out.push(sample);
            }
        }
        out
    }
}

// The ring buffer halves have no Debug impl; show identity, not contents
impl fmt::Debug for AudioStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioStream")
            .field("id", &self.id)
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_enable_toggle() {
        let track = AudioTrack::new();
        assert!(track.is_enabled());
        track.set_enabled(false);
        assert!(!track.is_enabled());
    }

    #[test]
    fn test_push_then_drain() {
        let stream = AudioStream::new();
        let pushed = stream.push_samples(&[0.1, 0.2, 0.3]);
        assert_eq!(pushed, 3);

        let drained = stream.drain_samples();
        assert_eq!(drained, vec![0.1, 0.2, 0.3]);
        assert!(stream.drain_samples().is_empty());
    }

    #[test]
    fn test_debug_format_shows_identity() {
        let stream = AudioStream::new();
        let rendered = format!("{:?}", stream);
        assert!(rendered.contains("AudioStream"));
        assert!(rendered.contains(&stream.id().to_string()));
    }

    #[test]
    fn test_track_shared_across_clones() {
        let track = AudioTrack::new();
        let clone = track.clone();
        track.set_enabled(false);
        assert!(!clone.is_enabled());
    }
}
