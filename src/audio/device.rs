//! Sound card input and output via `cpal`.
//!
//! `cpal::Stream` is not `Send` on every platform, so each stream is built
//! and kept alive on its own thread. The thread reports whether the device
//! could be opened, then parks until told to stop.

use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, CaptureBlock};
use super::resample::resample_linear;
use crate::client::{BufferId, PlaybackOutput};

/// Device blocks waiting for the framer before new ones are dropped
const CAPTURE_QUEUE: usize = 64;

/// Samples kept for `recent_output`
const RECENT_CAPACITY: usize = 4096;

/// Owns a cpal stream on a dedicated thread
struct StreamThread {
    stop: std_mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Run `build` on a new thread and keep its stream alive until `shutdown`
    fn spawn<F>(name: &str, build: F) -> Result<Self>
    where
        F: FnOnce() -> Result<cpal::Stream> + Send + 'static,
    {
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build().and_then(|s| s.play().map(|_| s).context("Failed to start stream")) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Returns on stop or when the owner is dropped
                let _ = stop_rx.recv();
                drop(stream);
            })
            .context("Failed to spawn audio thread")?;

        ready_rx
            .recv()
            .map_err(|_| anyhow!("Audio thread exited before opening the device"))??;

        Ok(Self {
            stop: stop_tx,
            thread: Some(thread),
        })
    }

    fn shutdown(&mut self) {
        let _ = self.stop.send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Audio thread panicked");
            }
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Default input device as a capture backend
pub struct MicrophoneBackend {
    config: AudioBackendConfig,
    stream: Option<StreamThread>,
}

impl MicrophoneBackend {
    pub fn new(config: AudioBackendConfig) -> Result<Self> {
        Ok(Self { config, stream: None })
    }
}

#[async_trait::async_trait]
impl AudioBackend for MicrophoneBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<CaptureBlock>> {
        let (tx, rx) = mpsc::channel(CAPTURE_QUEUE);

        let stream = tokio::task::spawn_blocking(move || {
            StreamThread::spawn("treez-capture", move || {
                let host = cpal::default_host();
                let device = host
                    .default_input_device()
                    .ok_or_else(|| anyhow!("No input device found on the default audio host"))?;
                let supported = device
                    .default_input_config()
                    .context("Failed to query default input config")?;

                let sample_rate = supported.sample_rate().0;
                let channels = supported.channels();
                let config: cpal::StreamConfig = supported.into();
                info!(
                    "Opening input device {} at {} Hz, {} channel(s)",
                    device.name().unwrap_or_else(|_| "<unknown>".to_string()),
                    sample_rate,
                    channels
                );

                device
                    .build_input_stream(
                        &config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| {
                            // Never block the audio callback
                            let _ = tx.try_send(CaptureBlock {
                                samples: data.to_vec(),
                                sample_rate,
                                channels,
                            });
                        },
                        |err: cpal::StreamError| error!("Input stream error: {}", err),
                        None,
                    )
                    .context("Failed to build input stream")
            })
        })
        .await
        .context("Input device task failed")??;

        self.stream = Some(stream);
        info!(
            "Microphone capture started (framing to {} Hz)",
            self.config.target_sample_rate
        );
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            tokio::task::spawn_blocking(move || stream.shutdown())
                .await
                .context("Input device task failed")?;
            info!("Microphone capture stopped");
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    fn name(&self) -> &str {
        "microphone"
    }
}

struct Voice {
    id: BufferId,
    samples: Vec<f32>,
    /// Absolute device frame of the first sample
    start_frame: u64,
}

/// State shared between the scheduler side and the output callback
#[derive(Default)]
struct Mixer {
    voices: Vec<Voice>,
    frames_played: u64,
    ended: Vec<BufferId>,
    recent: VecDeque<f32>,
}

impl Mixer {
    fn render(&mut self, out: &mut [f32], channels: usize) {
        for frame in out.chunks_mut(channels.max(1)) {
            let now = self.frames_played;
            let mut sample = 0.0_f32;
            for voice in &self.voices {
                if now >= voice.start_frame {
                    if let Some(s) = voice.samples.get((now - voice.start_frame) as usize) {
                        sample += s;
                    }
                }
            }
            let sample = sample.clamp(-1.0, 1.0);
            frame.iter_mut().for_each(|slot| *slot = sample);

            if self.recent.len() == RECENT_CAPACITY {
                self.recent.pop_front();
            }
            self.recent.push_back(sample);
            self.frames_played += 1;
        }

        let played = self.frames_played;
        let ended = &mut self.ended;
        self.voices.retain(|voice| {
            let done = voice.start_frame + voice.samples.len() as u64 <= played;
            if done {
                ended.push(voice.id);
            }
            !done
        });
    }
}

fn lock(mixer: &Mutex<Mixer>) -> MutexGuard<'_, Mixer> {
    mixer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Default output device driven by the playback scheduler.
///
/// The output clock is the number of frames the device has consumed, so
/// scheduled start times line up with what is actually heard.
pub struct DeviceOutput {
    mixer: Arc<Mutex<Mixer>>,
    sample_rate: u32,
    stream: Option<StreamThread>,
    closed: Arc<AtomicBool>,
}

impl DeviceOutput {
    pub fn open(preferred_rate: u32) -> Result<Self> {
        let mixer = Arc::new(Mutex::new(Mixer::default()));
        let closed = Arc::new(AtomicBool::new(false));
        let (rate_tx, rate_rx) = std_mpsc::channel::<u32>();

        let callback_mixer = mixer.clone();
        let callback_closed = closed.clone();
        let stream = StreamThread::spawn("treez-playback", move || {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| anyhow!("No output device found on the default audio host"))?;
            let supported = device
                .default_output_config()
                .context("Failed to query default output config")?;

            let channels = supported.channels() as usize;
            let mut config: cpal::StreamConfig = supported.into();
            let supports_preferred = device
                .supported_output_configs()
                .map(|mut configs| {
                    configs.any(|c| {
                        c.channels() as usize == channels
                            && c.min_sample_rate().0 <= preferred_rate
                            && c.max_sample_rate().0 >= preferred_rate
                    })
                })
                .unwrap_or(false);
            if supports_preferred {
                config.sample_rate = cpal::SampleRate(preferred_rate);
            }
            let _ = rate_tx.send(config.sample_rate.0);

            info!(
                "Opening output device {} at {} Hz, {} channel(s)",
                device.name().unwrap_or_else(|_| "<unknown>".to_string()),
                config.sample_rate.0,
                channels
            );

            device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        lock(&callback_mixer).render(data, channels);
                    },
                    move |err: cpal::StreamError| {
                        error!("Output stream error: {}", err);
                        callback_closed.store(true, Ordering::SeqCst);
                    },
                    None,
                )
                .context("Failed to build output stream")
        })?;

        let sample_rate = rate_rx.recv().unwrap_or(preferred_rate);

        Ok(Self {
            mixer,
            sample_rate,
            stream: Some(stream),
            closed,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl PlaybackOutput for DeviceOutput {
    fn current_time(&self) -> f64 {
        lock(&self.mixer).frames_played as f64 / self.sample_rate as f64
    }

    fn start(&mut self, id: BufferId, samples: Arc<[f32]>, sample_rate: u32, at: f64) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            anyhow::bail!("Output device is gone");
        }
        let samples = resample_linear(&samples, sample_rate, self.sample_rate);
        let start_frame = (at * self.sample_rate as f64).round().max(0.0) as u64;

        lock(&self.mixer).voices.push(Voice {
            id,
            samples,
            start_frame,
        });
        Ok(())
    }

    fn stop(&mut self, id: BufferId) {
        lock(&self.mixer).voices.retain(|voice| voice.id != id);
    }

    fn drain_ended(&mut self) -> Vec<BufferId> {
        std::mem::take(&mut lock(&self.mixer).ended)
    }

    fn recent_output(&self, len: usize) -> Vec<f32> {
        let mixer = lock(&self.mixer);
        let skip = mixer.recent.len().saturating_sub(len);
        let mut out: Vec<f32> = mixer.recent.iter().skip(skip).copied().collect();
        if out.len() < len {
            let mut padded = vec![0.0; len - out.len()];
            padded.append(&mut out);
            out = padded;
        }
        out
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown();
            info!("Playback device closed");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "device"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixer_plays_voices_at_their_start_frame() {
        let mut mixer = Mixer::default();
        mixer.voices.push(Voice {
            id: 1,
            samples: vec![0.5; 4],
            start_frame: 2,
        });

        let mut out = vec![0.0; 8];
        mixer.render(&mut out, 1);

        assert_eq!(out, vec![0.0, 0.0, 0.5, 0.5, 0.5, 0.5, 0.0, 0.0]);
        assert_eq!(mixer.ended, vec![1]);
        assert!(mixer.voices.is_empty());
    }

    #[test]
    fn test_mixer_duplicates_mono_across_channels() {
        let mut mixer = Mixer::default();
        mixer.voices.push(Voice {
            id: 0,
            samples: vec![0.25; 8],
            start_frame: 0,
        });

        let mut out = vec![0.0; 4];
        mixer.render(&mut out, 2);

        assert_eq!(out, vec![0.25; 4]);
        assert_eq!(mixer.frames_played, 2);
        assert!(mixer.ended.is_empty());
    }
}
