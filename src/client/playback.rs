//! Gapless playback scheduling with interrupt-driven flush.
//!
//! Model audio arrives as discrete messages with irregular spacing. Each
//! decoded buffer is started at `max(next_start, now)` and `next_start`
//! advances by the buffer's duration, so consecutive buffers play back to
//! back with no gap and no overlap. An interruption stops everything that is
//! scheduled or playing and rewinds `next_start` to zero.
//!
//! `next_start` is kept as an anchor time plus a whole number of samples
//! queued since the anchor, so long sessions do not accumulate rounding
//! drift from repeatedly adding fractional durations.

use anyhow::{bail, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::debug;

use crate::audio::codec::AudioFrame;

/// Handle of one scheduled buffer
pub type BufferId = u64;

/// Monotonic clock in seconds
pub trait PlaybackClock: Send + Sync {
    fn now(&self) -> f64;
}

/// Seconds since construction
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackClock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Externally driven clock for simulations and tests
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<f64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, t: f64) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now = now.max(t);
    }

    pub fn advance(&self, dt: f64) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += dt.max(0.0);
    }
}

impl PlaybackClock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Audio output the scheduler drives
pub trait PlaybackOutput: Send {
    /// Output clock in seconds; the time base for `start`
    fn current_time(&self) -> f64;

    /// Play `samples` (mono, `sample_rate`) starting at absolute time `at`
    fn start(&mut self, id: BufferId, samples: Arc<[f32]>, sample_rate: u32, at: f64) -> Result<()>;

    /// Stop a buffer immediately, mid-playback if it already started
    fn stop(&mut self, id: BufferId);

    /// Buffers that finished playing on their own since the last call
    fn drain_ended(&mut self) -> Vec<BufferId>;

    /// Most recent `len` output samples, for visualization
    fn recent_output(&self, len: usize) -> Vec<f32>;

    /// Release the device or flush the sink
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str;
}

impl<T: PlaybackOutput + ?Sized> PlaybackOutput for Box<T> {
    fn current_time(&self) -> f64 {
        (**self).current_time()
    }

    fn start(&mut self, id: BufferId, samples: Arc<[f32]>, sample_rate: u32, at: f64) -> Result<()> {
        (**self).start(id, samples, sample_rate, at)
    }

    fn stop(&mut self, id: BufferId) {
        (**self).stop(id)
    }

    fn drain_ended(&mut self) -> Vec<BufferId> {
        (**self).drain_ended()
    }

    fn recent_output(&self, len: usize) -> Vec<f32> {
        (**self).recent_output(len)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Placement of one buffer on the output clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledBuffer {
    pub id: BufferId,
    pub start: f64,
    pub duration: f64,
}

impl ScheduledBuffer {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// `next_start` as anchor + samples queued at `rate`
#[derive(Debug, Clone, Copy, Default)]
struct Cursor {
    anchor: f64,
    samples: u64,
    rate: u32,
}

impl Cursor {
    fn time(&self) -> f64 {
        if self.rate == 0 {
            self.anchor
        } else {
            self.anchor + self.samples as f64 / self.rate as f64
        }
    }

    fn rebase(&mut self, anchor: f64, rate: u32) {
        self.anchor = anchor;
        self.samples = 0;
        self.rate = rate;
    }
}

/// Playback queue: active handles plus the next permitted start time
pub struct PlaybackScheduler<O: PlaybackOutput> {
    output: O,
    active: BTreeMap<BufferId, ScheduledBuffer>,
    cursor: Cursor,
    next_id: BufferId,
}

impl<O: PlaybackOutput> PlaybackScheduler<O> {
    pub fn new(output: O) -> Self {
        Self {
            output,
            active: BTreeMap::new(),
            cursor: Cursor::default(),
            next_id: 0,
        }
    }

    /// Absolute time at which the next buffer may begin
    pub fn next_start_time(&self) -> f64 {
        self.cursor.time()
    }

    /// Queue one decoded buffer right after everything already queued
    pub fn schedule(&mut self, frame: &AudioFrame) -> Result<ScheduledBuffer> {
        if frame.sample_rate == 0 {
            bail!("cannot schedule {} samples at a zero sample rate", frame.samples.len());
        }
        let now = self.output.current_time();

        if self.cursor.time() < now {
            self.cursor.rebase(now, frame.sample_rate);
        } else if self.cursor.rate != frame.sample_rate {
            let next = self.cursor.time();
            self.cursor.rebase(next, frame.sample_rate);
        }

        let start = self.cursor.time();
        let id = self.next_id;
        let samples: Arc<[f32]> = frame.to_float().into();

        self.output.start(id, samples, frame.sample_rate, start)?;

        self.next_id += 1;
        self.cursor.samples += frame.samples.len() as u64;

        let buffer = ScheduledBuffer {
            id,
            start,
            duration: frame.duration_secs(),
        };
        self.active.insert(id, buffer);

        debug!(
            "Scheduled buffer {} at {:.3}s for {:.3}s ({} active)",
            id,
            start,
            buffer.duration,
            self.active.len()
        );

        Ok(buffer)
    }

    /// Stop every scheduled or playing buffer and rewind to zero.
    ///
    /// Returns how many buffers were stopped.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.active.len();
        for id in self.active.keys() {
            self.output.stop(*id);
        }
        self.active.clear();
        self.cursor = Cursor::default();

        debug!("Playback interrupted, {} buffers stopped", stopped);
        stopped
    }

    /// Completion callback for a buffer that played to its end
    pub fn on_ended(&mut self, id: BufferId) -> bool {
        self.active.remove(&id).is_some()
    }

    /// Collect natural completions from the output
    pub fn poll_ended(&mut self) -> Vec<BufferId> {
        let ended = self.output.drain_ended();
        for id in &ended {
            self.on_ended(*id);
        }
        ended
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn active(&self) -> impl Iterator<Item = &ScheduledBuffer> {
        self.active.values()
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }

    /// Stop everything and hand back the output
    pub fn into_output(mut self) -> O {
        self.interrupt();
        self.output
    }
}
