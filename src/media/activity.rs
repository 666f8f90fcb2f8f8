//! Speaking/energy analysis
//!
//! Pull-based: the UI polls `poll()` at its own interval (animation frame or
//! a fixed tick) and gets back a rolling average of recent signal energy.
//! State is reset whenever the source stream reference changes.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use super::stream::AudioStream;

/// RMS energy above which a stream counts as speaking
pub const DEFAULT_SPEAKING_THRESHOLD: f32 = 0.01;

/// Number of recent polls averaged into the reported level
const ENERGY_WINDOW: usize = 8;

struct AnalyzerState {
    stream: Option<Arc<AudioStream>>,
    window: VecDeque<f32>,
}

/// Derives a rolling signal-energy value from an audio stream
pub struct AudioActivityAnalyzer {
    state: Mutex<AnalyzerState>,
    threshold: f32,
}

impl AudioActivityAnalyzer {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_SPEAKING_THRESHOLD)
    }

    pub fn with_threshold(threshold: f32) -> Self {
        Self {
            state: Mutex::new(AnalyzerState {
                stream: None,
                window: VecDeque::with_capacity(ENERGY_WINDOW),
            }),
            threshold,
        }
    }

    /// Point the analyzer at a stream; a different stream resets the window
    pub fn attach(&self, stream: Arc<AudioStream>) {
        let mut state = self.state.lock();
        let changed = state
            .stream
            .as_ref()
            .map(|current| current.id() != stream.id())
            .unwrap_or(true);
        if changed {
            state.window.clear();
        }
        state.stream = Some(stream);
    }

    pub fn detach(&self) {
        let mut state = self.state.lock();
        state.stream = None;
        state.window.clear();
    }

    /// Consume buffered samples and return the rolling average energy (RMS)
    pub fn poll(&self) -> f32 {
        let mut state = self.state.lock();

        let energy = match state.stream {
            Some(ref stream) => {
                let samples = stream.drain_samples();
                rms(&samples)
            }
            None => 0.0,
        };

        if state.window.len() >= ENERGY_WINDOW {
            state.window.pop_front();
        }
        state.window.push_back(energy);

        let sum: f32 = state.window.iter().sum();
        sum / state.window.len() as f32
    }

    /// Whether the rolling level is above the speaking threshold
    pub fn is_speaking(&self) -> bool {
        self.poll() > self.threshold
    }
}

impl Default for AudioActivityAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}
