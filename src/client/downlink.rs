use tracing::{debug, warn};

use crate::audio::codec::AudioFrame;
use crate::protocol::ServerMessage;

/// Decoded effect of one relay → client message
#[derive(Debug, Clone, PartialEq)]
pub enum DownlinkEvent {
    /// Relay reports the provider session ready
    Open,
    /// Model audio, one frame per inline part, in part order
    Audio(Vec<AudioFrame>),
    /// Flush playback now
    Interrupted,
    TurnComplete,
}

/// Relay → client decoding
#[derive(Debug, Default)]
pub struct Downlink {
    malformed: u64,
    ignored: u64,
}

impl Downlink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one text frame into zero or more events.
    ///
    /// A message may carry audio and an interruption together; audio is
    /// reported first. Undecodable messages and undecodable audio parts are
    /// logged and skipped.
    pub fn decode(&mut self, text: &str) -> Vec<DownlinkEvent> {
        let message = match ServerMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                self.malformed += 1;
                warn!("Dropping malformed relay message: {}", e);
                return Vec::new();
            }
        };

        let mut events = Vec::new();

        if message.is_open() {
            events.push(DownlinkEvent::Open);
        }

        let rejected = message.rejected_audio_parts();
        if rejected > 0 {
            self.malformed += rejected as u64;
            warn!("Dropping {} audio part(s) with an unusable sample rate", rejected);
        }

        let frames: Vec<AudioFrame> = message
            .audio_parts()
            .into_iter()
            .filter_map(|(chunk, rate)| match AudioFrame::from_base64(&chunk.data, rate) {
                Ok(frame) => Some(frame),
                Err(e) => {
                    self.malformed += 1;
                    warn!("Dropping undecodable audio part: {}", e);
                    None
                }
            })
            .filter(|frame| !frame.samples.is_empty())
            .collect();
        if !frames.is_empty() {
            events.push(DownlinkEvent::Audio(frames));
        }

        if message.is_interrupted() {
            events.push(DownlinkEvent::Interrupted);
        }
        if message.is_turn_complete() {
            events.push(DownlinkEvent::TurnComplete);
        }

        if events.is_empty() {
            self.ignored += 1;
            debug!("Ignoring relay message without playable content");
        }

        events
    }

    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    pub fn ignored(&self) -> u64 {
        self.ignored
    }
}
