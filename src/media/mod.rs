//! Local media capture, streams, and activity analysis

mod activity;
mod controller;
mod device;
mod error;
mod stream;

pub use activity::{AudioActivityAnalyzer, DEFAULT_SPEAKING_THRESHOLD};
pub use controller::{CaptureSession, LocalMediaController, MediaCapture, NullCapture};
pub use device::{CaptureConfig, CpalCapture};
pub use error::MediaError;
pub use stream::{AudioStream, AudioTrack};
