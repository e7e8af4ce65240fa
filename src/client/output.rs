use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use super::playback::{BufferId, PlaybackClock, PlaybackOutput, SystemClock};
use crate::audio::resample::resample_linear;

/// How long finished buffers stay around for `recent_output`
const HISTORY_SECS: f64 = 1.0;

#[derive(Debug, Clone)]
struct Segment {
    id: BufferId,
    samples: Arc<[f32]>,
    sample_rate: u32,
    start: f64,
    /// Natural end, or the stop time once stopped
    end: f64,
    finished: bool,
}

impl Segment {
    fn sample_at(&self, t: f64) -> f32 {
        if t < self.start || t >= self.end {
            return 0.0;
        }
        let idx = ((t - self.start) * self.sample_rate as f64) as usize;
        self.samples.get(idx).copied().unwrap_or(0.0)
    }
}

/// Clocked bookkeeping of started, stopped and finished buffers.
///
/// Shared by the outputs that have no device to report completions.
pub struct Timeline {
    clock: Arc<dyn PlaybackClock>,
    sample_rate: u32,
    segments: Vec<Segment>,
    keep_all: bool,
}

impl Timeline {
    pub fn new(clock: Arc<dyn PlaybackClock>, sample_rate: u32) -> Self {
        Self {
            clock,
            sample_rate,
            segments: Vec::new(),
            keep_all: false,
        }
    }

    fn keeping_history(mut self) -> Self {
        self.keep_all = true;
        self
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn start(&mut self, id: BufferId, samples: Arc<[f32]>, sample_rate: u32, at: f64) {
        let duration = samples.len() as f64 / sample_rate.max(1) as f64;
        self.segments.push(Segment {
            id,
            samples,
            sample_rate,
            start: at,
            end: at + duration,
            finished: false,
        });
    }

    pub fn stop(&mut self, id: BufferId) {
        let now = self.now();
        if let Some(segment) = self.segments.iter_mut().find(|s| s.id == id && !s.finished) {
            segment.end = segment.end.min(now.max(segment.start));
            segment.finished = true;
        }
    }

    pub fn drain_ended(&mut self) -> Vec<BufferId> {
        let now = self.now();
        let mut ended = Vec::new();
        for segment in self.segments.iter_mut().filter(|s| !s.finished && s.end <= now) {
            segment.finished = true;
            ended.push(segment.id);
        }

        if !self.keep_all {
            self.segments
                .retain(|s| !s.finished || s.end >= now - HISTORY_SECS);
        }
        ended
    }

    /// Mix of everything audible over the last `len` output samples
    pub fn recent_output(&self, len: usize) -> Vec<f32> {
        let now = self.now();
        let rate = self.sample_rate.max(1) as f64;
        (0..len)
            .map(|i| {
                let t = now - (len - i) as f64 / rate;
                let mixed: f32 = self.segments.iter().map(|s| s.sample_at(t)).sum();
                mixed.clamp(-1.0, 1.0)
            })
            .collect()
    }

    /// Render the whole timeline from t=0 at the output rate, honoring stops
    pub fn render(&self) -> Vec<f32> {
        let rate = self.sample_rate.max(1) as f64;
        let total_end = self.segments.iter().map(|s| s.end).fold(0.0_f64, f64::max);
        let mut out = vec![0.0_f32; (total_end * rate).ceil() as usize];

        for segment in &self.segments {
            let samples = if segment.sample_rate == self.sample_rate {
                segment.samples.to_vec()
            } else {
                resample_linear(&segment.samples, segment.sample_rate, self.sample_rate)
            };
            let offset = (segment.start * rate).round() as usize;
            let audible = ((segment.end - segment.start) * rate).round() as usize;

            for (k, sample) in samples.iter().take(audible).enumerate() {
                if let Some(slot) = out.get_mut(offset + k) {
                    *slot += sample;
                }
            }
        }

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
        out
    }
}

/// Discards audio; keeps timing so playback events still happen
pub struct NullOutput {
    timeline: Timeline,
}

impl NullOutput {
    pub fn new(sample_rate: u32) -> Self {
        Self::with_clock(Arc::new(SystemClock::new()), sample_rate)
    }

    pub fn with_clock(clock: Arc<dyn PlaybackClock>, sample_rate: u32) -> Self {
        Self {
            timeline: Timeline::new(clock, sample_rate),
        }
    }
}

impl PlaybackOutput for NullOutput {
    fn current_time(&self) -> f64 {
        self.timeline.now()
    }

    fn start(&mut self, id: BufferId, samples: Arc<[f32]>, sample_rate: u32, at: f64) -> Result<()> {
        self.timeline.start(id, samples, sample_rate, at);
        Ok(())
    }

    fn stop(&mut self, id: BufferId) {
        self.timeline.stop(id)
    }

    fn drain_ended(&mut self) -> Vec<BufferId> {
        self.timeline.drain_ended()
    }

    fn recent_output(&self, len: usize) -> Vec<f32> {
        self.timeline.recent_output(len)
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Records what would have been heard to a 16-bit mono WAV file
pub struct WavOutput {
    path: PathBuf,
    timeline: Timeline,
    written: bool,
}

impl WavOutput {
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> Result<Self> {
        Self::with_clock(path, Arc::new(SystemClock::new()), sample_rate)
    }

    pub fn with_clock(path: impl AsRef<Path>, clock: Arc<dyn PlaybackClock>, sample_rate: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        Ok(Self {
            path,
            timeline: Timeline::new(clock, sample_rate).keeping_history(),
            written: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self) -> Result<usize> {
        let spec = WavSpec {
            channels: 1,
            sample_rate: self.timeline.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&self.path, spec)
            .with_context(|| format!("Failed to create {}", self.path.display()))?;

        let rendered = self.timeline.render();
        for sample in crate::audio::codec::float_to_pcm16(&rendered) {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(rendered.len())
    }
}

impl PlaybackOutput for WavOutput {
    fn current_time(&self) -> f64 {
        self.timeline.now()
    }

    fn start(&mut self, id: BufferId, samples: Arc<[f32]>, sample_rate: u32, at: f64) -> Result<()> {
        self.timeline.start(id, samples, sample_rate, at);
        Ok(())
    }

    fn stop(&mut self, id: BufferId) {
        self.timeline.stop(id)
    }

    fn drain_ended(&mut self) -> Vec<BufferId> {
        self.timeline.drain_ended()
    }

    fn recent_output(&self, len: usize) -> Vec<f32> {
        self.timeline.recent_output(len)
    }

    fn finish(&mut self) -> Result<()> {
        if self.written {
            return Ok(());
        }
        let samples = self.write()?;
        self.written = true;
        info!("Wrote {} playback samples to {}", samples, self.path.display());
        Ok(())
    }

    fn name(&self) -> &str {
        "wav"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::playback::ManualClock;

    fn tone(len: usize) -> Arc<[f32]> {
        vec![0.5_f32; len].into()
    }

    #[test]
    fn test_ended_only_after_clock_passes_end() {
        let clock = Arc::new(ManualClock::new());
        let mut output = NullOutput::with_clock(clock.clone(), 1000);

        output.start(0, tone(100), 1000, 0.0).unwrap();
        assert!(output.drain_ended().is_empty());

        clock.set(0.1);
        assert_eq!(output.drain_ended(), vec![0]);
        assert!(output.drain_ended().is_empty());
    }

    #[test]
    fn test_stopped_buffer_never_reports_ended() {
        let clock = Arc::new(ManualClock::new());
        let mut output = NullOutput::with_clock(clock.clone(), 1000);

        output.start(7, tone(100), 1000, 0.0).unwrap();
        clock.set(0.05);
        output.stop(7);
        clock.set(1.0);
        assert!(output.drain_ended().is_empty());
    }

    #[test]
    fn test_recent_output_reflects_audible_buffer() {
        let clock = Arc::new(ManualClock::new());
        let mut output = NullOutput::with_clock(clock.clone(), 1000);

        output.start(0, tone(1000), 1000, 0.0).unwrap();
        clock.set(0.5);
        let recent = output.recent_output(100);
        assert_eq!(recent.len(), 100);
        assert!(recent.iter().all(|s| (*s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_render_truncates_at_stop() {
        let clock = Arc::new(ManualClock::new());
        let mut timeline = Timeline::new(clock.clone(), 1000).keeping_history();

        timeline.start(0, tone(1000), 1000, 0.0);
        clock.set(0.25);
        timeline.stop(0);

        let rendered = timeline.render();
        assert_eq!(rendered.len(), 250);
    }
}
