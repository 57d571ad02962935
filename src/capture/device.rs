//! Audio input sources.
//!
//! The pipeline consumes any `AudioSource`; the cpal microphone source is
//! behind the `mic` feature so headless builds need no audio stack.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::CaptureError;

/// A stream of captured sample chunks (mono f32, capture sample rate).
#[async_trait]
pub trait AudioSource: Send {
    /// Next chunk of samples. `Ok(None)` means the stream ended cleanly;
    /// `Err(CaptureLost)` means the device went away.
    async fn next_chunk(&mut self) -> Result<Option<Vec<f32>>, CaptureError>;
}

/// Channel-backed source; the producer side lives on a device thread (or in
/// a test).
pub struct ChannelSource {
    rx: mpsc::Receiver<Result<Vec<f32>, CaptureError>>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<Result<Vec<f32>, CaptureError>>) -> Self {
        Self { rx }
    }

    /// A fresh source plus its producer handle.
    pub fn pair(buffer: usize) -> (mpsc::Sender<Result<Vec<f32>, CaptureError>>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self { rx })
    }
}

#[async_trait]
impl AudioSource for ChannelSource {
    async fn next_chunk(&mut self) -> Result<Option<Vec<f32>>, CaptureError> {
        match self.rx.recv().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

#[cfg(feature = "mic")]
mod mic {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use tokio::sync::mpsc;
    use tracing::{error, info, warn};

    use super::{CaptureError, ChannelSource};
    use crate::config::AudioConfig;

    /// Open the configured input device and return a source fed from a
    /// dedicated device thread.
    ///
    /// The cpal stream is not `Send`, so it lives on its own thread for the
    /// life of the capture; chunks and device errors are forwarded over the
    /// channel.
    pub fn open_microphone(config: &AudioConfig) -> anyhow::Result<ChannelSource> {
        use anyhow::Context;

        let host = cpal::default_host();

        let device = match &config.device {
            Some(name) => host
                .input_devices()
                .context("Failed to enumerate input devices")?
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .with_context(|| format!("Audio input device not found: {}", name))?,
            None => host
                .default_input_device()
                .context("No default audio input device")?,
        };

        info!(device = %device.name().unwrap_or_else(|_| "unknown".into()), "opening input device");

        let stream_config = cpal::StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (tx, rx) = mpsc::channel(64);
        let channels = config.channels as usize;

        std::thread::Builder::new()
            .name("daybook-mic".to_string())
            .spawn(move || {
                let data_tx = tx.clone();
                let err_tx = tx.clone();

                let stream = device.build_input_stream(
                    &stream_config,
                    move |data: &[f32], _| {
                        // Downmix to mono and hand off; a full channel means
                        // the pipeline is saturated and we shed samples here.
                        let mono: Vec<f32> = if channels > 1 {
                            data.chunks(channels)
                                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                                .collect()
                        } else {
                            data.to_vec()
                        };

                        if data_tx.try_send(Ok(mono)).is_err() {
                            warn!("capture channel full, shedding samples");
                        }
                    },
                    move |e| {
                        let _ = err_tx.try_send(Err(CaptureError::CaptureLost(e.to_string())));
                    },
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            let _ =
                                tx.blocking_send(Err(CaptureError::CaptureLost(e.to_string())));
                            return;
                        }
                        // Keep the stream alive until the consumer goes away.
                        while !tx.is_closed() {
                            std::thread::sleep(std::time::Duration::from_millis(200));
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "failed to open input stream");
                        let _ = tx.blocking_send(Err(CaptureError::CaptureLost(e.to_string())));
                    }
                }
            })
            .context("Failed to spawn microphone thread")?;

        Ok(ChannelSource::new(rx))
    }
}

#[cfg(feature = "mic")]
pub use mic::open_microphone;
