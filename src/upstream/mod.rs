//! Upstream model provider sessions
//!
//! The relay consumes the provider through [`UpstreamConnector`]: open a
//! realtime audio session (system prompt + voice), push audio input, receive
//! audio/control events. Each [`UpstreamSession`] is owned by exactly one
//! relay connection; dropping its input sender closes the provider socket.

mod client;
pub mod messages;

pub use client::GeminiLiveConnector;

use tokio::sync::mpsc;

use crate::config::UpstreamConfig;
use crate::error::LiveResult;
use crate::protocol::MediaChunk;

/// Session parameters sent when opening a provider session
#[derive(Debug, Clone)]
pub struct LiveSetup {
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
}

impl From<&UpstreamConfig> for LiveSetup {
    fn from(config: &UpstreamConfig) -> Self {
        Self {
            model: config.model.clone(),
            voice: config.voice.clone(),
            system_instruction: config.system_instruction.clone(),
        }
    }
}

/// Event produced by a provider session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// A server message, as JSON text, to be forwarded untouched
    Message(String),
    /// The provider closed the session gracefully
    Closed,
    /// The provider session failed (auth, quota, network)
    Error(String),
}

/// Handles to one open provider session
pub struct UpstreamSession {
    /// Realtime audio input. Dropping it closes the provider session.
    pub input: mpsc::Sender<MediaChunk>,
    /// Events in provider order. `None` after the session ended.
    pub events: mpsc::Receiver<UpstreamEvent>,
}

/// Opens provider sessions
#[async_trait::async_trait]
pub trait UpstreamConnector: Send + Sync {
    /// Open a session and wait until the provider acknowledged the setup.
    ///
    /// Fails with `LiveError::UpstreamConnect`.
    async fn connect(&self, setup: &LiveSetup) -> LiveResult<UpstreamSession>;

    /// Whether credentials are present; used for health reporting only
    fn is_configured(&self) -> bool {
        true
    }

    fn name(&self) -> &str;
}
