//! Live voice client
//!
//! One event loop task per session owns the playback queue. Capture runs on
//! its own task and hands finished frames to the uplink without waiting; the
//! loop multiplexes the relay socket, outgoing frames, a render tick and the
//! disconnect signal.

mod capture;
mod downlink;
mod output;
mod playback;
mod session;
mod status;
mod uplink;
mod visualizer;

pub use capture::{AudioCapture, Framer};
pub use downlink::{Downlink, DownlinkEvent};
pub use output::{NullOutput, Timeline, WavOutput};
pub use playback::{
    BufferId, ManualClock, PlaybackClock, PlaybackOutput, PlaybackScheduler, ScheduledBuffer, SystemClock,
};
pub use session::{ClientStats, LiveClient, LiveHandle, PlaybackEvent};
pub use status::ConnectionStatus;
pub use uplink::{Uplink, UplinkGate, UplinkOutcome, UplinkStats};
pub use visualizer::{Visualizer, BAR_COUNT, BIN_COUNT, WINDOW_SIZE};
