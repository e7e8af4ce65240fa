use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader};
use std::path::Path;
use tokio::sync::mpsc;
use tracing::info;

use super::backend::{AudioBackend, AudioBackendConfig, CaptureBlock};
use super::resample::{downmix_to_mono, resample_linear};

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples normalized to [-1.0, 1.0]
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Float, _) => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            (SampleFormat::Int, bits) if bits <= 16 => reader
                .into_samples::<i16>()
                .map(|s| s.map(|v| v as f32 / 32_768.0))
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            (SampleFormat::Int, bits) => {
                let scale = (1i64 << (bits - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<Vec<_>, _>>()
                    .context("Failed to read audio samples")?
            }
        };

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Mono samples at `target_rate`
    pub fn to_mono(&self, target_rate: u32) -> Vec<f32> {
        let mono = downmix_to_mono(&self.samples, self.channels);
        resample_linear(&mono, self.sample_rate, target_rate)
    }
}

/// Plays a WAV file into the capture path at real-time pace
pub struct FileBackend {
    name: String,
    samples: Vec<f32>,
    config: AudioBackendConfig,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl FileBackend {
    pub fn open(path: impl AsRef<Path>, config: AudioBackendConfig) -> Result<Self> {
        let file = AudioFile::open(path.as_ref())?;
        let samples = file.to_mono(config.target_sample_rate);

        Ok(Self {
            name: format!("file:{}", file.path),
            samples,
            config,
            task: None,
        })
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<CaptureBlock>> {
        if self.task.is_some() {
            anyhow::bail!("Already capturing");
        }

        let (tx, rx) = mpsc::channel(8);
        let frame_samples = self.config.frame_len();
        let sample_rate = self.config.target_sample_rate;
        let samples = self.samples.clone();
        let mut ticker = tokio::time::interval(self.config.frame_duration());

        info!("Starting file capture: {} ({} samples)", self.name, samples.len());

        self.task = Some(tokio::spawn(async move {
            for chunk in samples.chunks(frame_samples) {
                ticker.tick().await;
                let block = CaptureBlock {
                    samples: chunk.to_vec(),
                    sample_rate,
                    channels: 1,
                };
                if tx.send(block).await.is_err() {
                    break;
                }
            }
            info!("File capture reached end of input");
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
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
