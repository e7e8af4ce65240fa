use anyhow::Result;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

use super::codec::{FRAME_SAMPLES, INPUT_SAMPLE_RATE};

/// Raw float audio as delivered by a capture device
#[derive(Debug, Clone)]
pub struct CaptureBlock {
    /// Interleaved samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of interleaved channels
    pub channels: u16,
}

/// Configuration for audio backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Target sample rate (will resample if needed)
    pub target_sample_rate: u32,
    /// Target channel count (1 = mono)
    pub target_channels: u16,
    /// Samples per emitted frame at the target rate
    pub frame_samples: usize,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: INPUT_SAMPLE_RATE, // provider expects 16kHz
            target_channels: 1,                    // Mono
            frame_samples: FRAME_SAMPLES,          // ~256ms frames
        }
    }
}

impl AudioBackendConfig {
    /// Samples per frame, never zero
    pub fn frame_len(&self) -> usize {
        self.frame_samples.max(1)
    }

    /// Wall-clock length of one frame, never zero so it can drive an interval
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(self.frame_len() as f64 / self.target_sample_rate.max(1) as f64)
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - cpal microphone (feature `device`)
/// - WAV file played back in real time (testing / scripted sessions)
/// - Silence generator (headless sessions)
/// - Channel-fed source (embedding)
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio blocks. Failing here
    /// means the input device could not be acquired.
    async fn start(&mut self) -> Result<mpsc::Receiver<CaptureBlock>>;

    /// Stop capturing audio
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create audio backend based on source and configuration
    pub fn create(source: AudioSource, config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        match source {
            AudioSource::Microphone => {
                #[cfg(feature = "device")]
                {
                    let backend = super::device::MicrophoneBackend::new(config)?;
                    Ok(Box::new(backend))
                }

                #[cfg(not(feature = "device"))]
                {
                    let _ = config;
                    anyhow::bail!("Microphone capture requires building with the `device` feature")
                }
            }

            AudioSource::File(path) => {
                let backend = super::file::FileBackend::open(&path, config)?;
                Ok(Box::new(backend))
            }

            AudioSource::Silence => Ok(Box::new(SilenceBackend::new(config))),
        }
    }
}

/// Audio source type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Default input device
    Microphone,
    /// WAV file, paced in real time
    File(String),
    /// Zero-valued frames, paced in real time
    Silence,
}

impl std::str::FromStr for AudioSource {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "mic" | "microphone" => AudioSource::Microphone,
            "silence" => AudioSource::Silence,
            path => AudioSource::File(path.to_string()),
        })
    }
}

/// Emits silent frames at the configured frame cadence
pub struct SilenceBackend {
    config: AudioBackendConfig,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl SilenceBackend {
    pub fn new(config: AudioBackendConfig) -> Self {
        Self { config, task: None }
    }
}

#[async_trait::async_trait]
impl AudioBackend for SilenceBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<CaptureBlock>> {
        if self.task.is_some() {
            anyhow::bail!("Already capturing");
        }

        let (tx, rx) = mpsc::channel(8);
        let block = CaptureBlock {
            samples: vec![0.0; self.config.frame_len()],
            sample_rate: self.config.target_sample_rate,
            channels: 1,
        };
        let mut ticker = tokio::time::interval(self.config.frame_duration());

        info!("Silence capture started ({}Hz)", self.config.target_sample_rate);

        self.task = Some(tokio::spawn(async move {
            loop {
                ticker.tick().await;
                if tx.send(block.clone()).await.is_err() {
                    break;
                }
            }
        }));

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.is_some()
    }

    fn name(&self) -> &str {
        "silence"
    }
}

/// Backend fed from an external channel.
///
/// The receiver is handed out on `start`; a second `start` fails because the
/// feed can only be consumed once.
pub struct ChannelBackend {
    rx: Option<mpsc::Receiver<CaptureBlock>>,
    capturing: bool,
}

impl ChannelBackend {
    pub fn new(capacity: usize) -> (Self, mpsc::Sender<CaptureBlock>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                rx: Some(rx),
                capturing: false,
            },
            tx,
        )
    }
}

#[async_trait::async_trait]
impl AudioBackend for ChannelBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<CaptureBlock>> {
        let rx = self
            .rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("Channel feed already consumed"))?;
        self.capturing = true;
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.capturing = false;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "channel"
    }
}
