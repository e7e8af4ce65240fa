use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::uplink::{Uplink, UplinkOutcome};
use crate::audio::backend::{AudioBackend, CaptureBlock};
use crate::audio::resample::{downmix_to_mono, StreamResampler};
use crate::error::{LiveError, LiveResult};

/// Microphone (or stand-in) capture feeding the uplink in fixed frames
pub struct AudioCapture {
    backend: Box<dyn AudioBackend>,
    target_rate: u32,
    frame_samples: usize,
    task: Option<JoinHandle<u64>>,
}

impl AudioCapture {
    pub fn new(backend: Box<dyn AudioBackend>, target_rate: u32, frame_samples: usize) -> Self {
        Self {
            backend,
            target_rate,
            frame_samples: frame_samples.max(1),
            task: None,
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Acquire the input and start framing into `uplink`.
    ///
    /// Failure to acquire the input is a permission failure.
    pub async fn start(&mut self, uplink: Uplink) -> LiveResult<()> {
        let blocks = self
            .backend
            .start()
            .await
            .map_err(|e| LiveError::Permission(format!("{:#}", e)))?;

        info!("Capturing from {} backend", self.backend.name());

        let framer = Framer::new(self.target_rate, self.frame_samples);
        self.task = Some(tokio::spawn(run_framer(blocks, framer, uplink)));
        Ok(())
    }

    /// Stop the framing task and release the input
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if self.backend.is_capturing() {
            if let Err(e) = self.backend.stop().await {
                warn!("Failed to stop {} backend: {:#}", self.backend.name(), e);
            }
        }
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_framer(mut blocks: mpsc::Receiver<CaptureBlock>, mut framer: Framer, uplink: Uplink) -> u64 {
    let mut offered = 0u64;
    while let Some(block) = blocks.recv().await {
        for frame in framer.push(&block) {
            offered += 1;
            if uplink.offer(&frame) == UplinkOutcome::DroppedBackpressure {
                debug!("Capture frame dropped under backpressure");
            }
        }
    }
    debug!("Capture stream ended after {} frames", offered);
    offered
}

/// Converts arbitrary device blocks into mono frames of fixed length at the target rate
pub struct Framer {
    target_rate: u32,
    frame_samples: usize,
    resampler: Option<(u32, StreamResampler)>,
    pending: Vec<f32>,
}

impl Framer {
    pub fn new(target_rate: u32, frame_samples: usize) -> Self {
        Self {
            target_rate,
            frame_samples: frame_samples.max(1),
            resampler: None,
            pending: Vec::new(),
        }
    }

    /// Feed one block; returns every frame it completed
    pub fn push(&mut self, block: &CaptureBlock) -> Vec<Vec<f32>> {
        let mono = downmix_to_mono(&block.samples, block.channels);

        if self.resampler.as_ref().map(|(rate, _)| *rate) != Some(block.sample_rate) {
            let resampler = StreamResampler::new(block.sample_rate, self.target_rate);
            self.resampler = Some((block.sample_rate, resampler));
        }
        match &mut self.resampler {
            Some((_, resampler)) => self.pending.extend(resampler.process(&mono)),
            None => self.pending.extend(mono),
        }

        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_samples {
            let rest = self.pending.split_off(self.frame_samples);
            frames.push(std::mem::replace(&mut self.pending, rest));
        }
        frames
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(len: usize, rate: u32, channels: u16) -> CaptureBlock {
        CaptureBlock {
            samples: vec![0.25; len * channels as usize],
            sample_rate: rate,
            channels,
        }
    }

    #[test]
    fn test_framer_emits_fixed_frames() {
        let mut framer = Framer::new(16_000, 4096);

        assert!(framer.push(&block(3000, 16_000, 1)).is_empty());
        let frames = framer.push(&block(3000, 16_000, 1));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 4096);
        assert_eq!(framer.pending_len(), 6000 - 4096);
    }

    #[test]
    fn test_framer_downmixes_and_resamples() {
        let mut framer = Framer::new(16_000, 1600);

        // 0.1s of 48kHz stereo becomes 0.1s of 16kHz mono
        let frames = framer.push(&block(4800, 48_000, 2));
        let total: usize = frames.iter().map(Vec::len).sum::<usize>() + framer.pending_len();
        assert!((1598..=1600).contains(&total), "got {total}");
    }
}
