use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::audio::codec::AudioFrame;
use crate::protocol::ClientMessage;

/// Flags consulted at every frame boundary
#[derive(Debug, Default)]
pub struct UplinkGate {
    open: AtomicBool,
    muted: AtomicBool,
}

impl UplinkGate {
    pub fn new(muted: bool) -> Self {
        Self {
            open: AtomicBool::new(false),
            muted: AtomicBool::new(muted),
        }
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }
}

/// What happened to one offered frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UplinkOutcome {
    Sent,
    DroppedMuted,
    DroppedNotOpen,
    DroppedBackpressure,
    /// The frame could not be serialized into an input message
    DroppedEncoding,
}

#[derive(Debug, Default)]
pub struct UplinkStats {
    pub sent: AtomicU64,
    pub dropped_muted: AtomicU64,
    pub dropped_not_open: AtomicU64,
    pub dropped_backpressure: AtomicU64,
    pub dropped_encoding: AtomicU64,
}

impl UplinkStats {
    /// Count one offered frame under its outcome
    pub fn record(&self, outcome: UplinkOutcome) {
        let counter = match outcome {
            UplinkOutcome::Sent => &self.sent,
            UplinkOutcome::DroppedMuted => &self.dropped_muted,
            UplinkOutcome::DroppedNotOpen => &self.dropped_not_open,
            UplinkOutcome::DroppedBackpressure => &self.dropped_backpressure,
            UplinkOutcome::DroppedEncoding => &self.dropped_encoding,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Client → relay audio framing.
///
/// `offer` never waits: a frame that cannot go out right now is dropped.
#[derive(Clone)]
pub struct Uplink {
    tx: mpsc::Sender<String>,
    gate: Arc<UplinkGate>,
    stats: Arc<UplinkStats>,
    sample_rate: u32,
}

impl Uplink {
    /// Returns the uplink and the receiver of encoded messages for the socket writer
    pub fn new(sample_rate: u32, queue: usize, gate: Arc<UplinkGate>) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(queue.max(1));
        (
            Self {
                tx,
                gate,
                stats: Arc::new(UplinkStats::default()),
                sample_rate,
            },
            rx,
        )
    }

    pub fn gate(&self) -> &Arc<UplinkGate> {
        &self.gate
    }

    pub fn stats(&self) -> &Arc<UplinkStats> {
        &self.stats
    }

    /// Encode and queue one captured frame of float samples
    pub fn offer(&self, samples: &[f32]) -> UplinkOutcome {
        let outcome = self.try_offer(samples);
        self.stats.record(outcome);
        outcome
    }

    fn try_offer(&self, samples: &[f32]) -> UplinkOutcome {
        if self.gate.is_muted() {
            return UplinkOutcome::DroppedMuted;
        }
        if !self.gate.is_open() {
            return UplinkOutcome::DroppedNotOpen;
        }

        let frame = AudioFrame::from_float(samples, self.sample_rate);
        let message = match ClientMessage::input(&frame).to_json() {
            Ok(message) => message,
            Err(e) => {
                warn!("Failed to encode input frame: {}", e);
                return UplinkOutcome::DroppedEncoding;
            }
        };

        match self.tx.try_send(message) {
            Ok(()) => UplinkOutcome::Sent,
            Err(TrySendError::Full(_)) => {
                debug!("Uplink queue full, dropping frame");
                UplinkOutcome::DroppedBackpressure
            }
            Err(TrySendError::Closed(_)) => {
                self.gate.set_open(false);
                UplinkOutcome::DroppedNotOpen
            }
        }
    }
}
