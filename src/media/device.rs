//! cpal-backed microphone capture
//!
//! The cpal stream is built and kept on a dedicated thread because it is not
//! `Send`; the session only exchanges a stop signal with that thread.

use std::sync::mpsc;
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use tracing::{error, info};

use super::controller::{CaptureSession, MediaCapture};
use super::error::MediaError;
use super::stream::AudioStream;

/// Capture parameters for the default input device
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_size: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 1,
            frame_size: 480,
        }
    }
}

/// Microphone capture through the platform's default input device
pub struct CpalCapture {
    config: CaptureConfig,
}

impl CpalCapture {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }
}

impl Default for CpalCapture {
    fn default() -> Self {
        Self::new(CaptureConfig::default())
    }
}

struct CpalSession {
    stream: Arc<AudioStream>,
    stop_tx: mpsc::Sender<()>,
}

impl CaptureSession for CpalSession {
    fn stream(&self) -> Arc<AudioStream> {
        self.stream.clone()
    }

    fn stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

impl MediaCapture for CpalCapture {
    fn open(&self) -> Result<Box<dyn CaptureSession>, MediaError> {
        let stream = AudioStream::new();
        let config = self.config.clone();

        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), MediaError>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let stream_for_thread = stream.clone();
        std::thread::spawn(move || {
            match build_capture_stream(&config, stream_for_thread) {
                Ok(capture_stream) => {
                    if let Err(e) = capture_stream.play() {
                        let _ = ready_tx.send(Err(MediaError::StreamError(e.to_string())));
                        return;
                    }
                    let _ = ready_tx.send(Ok(()));
                    // Hold the stream until the session stops
                    let _ = stop_rx.recv();
                    drop(capture_stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            }
        });

        ready_rx
            .recv()
            .map_err(|_| MediaError::Unavailable("capture thread exited".into()))??;

        info!("Capture started ({} Hz)", self.config.sample_rate);
        Ok(Box::new(CpalSession { stream, stop_tx }))
    }
}

fn build_capture_stream(
    config: &CaptureConfig,
    stream: Arc<AudioStream>,
) -> Result<cpal::Stream, MediaError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| MediaError::Unavailable("no default input device".into()))?;

    let device_name = device.name().unwrap_or_default();
    info!("Opening capture device: {}", device_name);

    let stream_config = StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Fixed(config.frame_size),
    };

    let track = stream.tracks()[0].clone();
    let err_fn = |err: cpal::StreamError| {
        error!("Capture stream error: {:?}", err);
    };

    let capture_stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if track.is_enabled() {
                    stream.push_samples(data);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| MediaError::Unavailable(e.to_string()))?;

    Ok(capture_stream)
}
