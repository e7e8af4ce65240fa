// Shared fixtures: a scripted provider and an in-process relay
#![allow(dead_code)]

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Semaphore};
use treez_live::audio::AudioFrame;
use treez_live::error::{LiveError, LiveResult};
use treez_live::protocol::MediaChunk;
use treez_live::relay::{self, AppState, RelaySettings};
use treez_live::upstream::{LiveSetup, UpstreamConnector, UpstreamEvent, UpstreamSession};

/// Test-side ends of one provider session
pub struct ScriptedSession {
    pub inputs: mpsc::Receiver<MediaChunk>,
    pub events: mpsc::Sender<UpstreamEvent>,
}

impl ScriptedSession {
    /// Next forwarded input, decoded
    pub async fn next_input(&mut self) -> Option<AudioFrame> {
        let chunk = tokio::time::timeout(Duration::from_secs(5), self.inputs.recv())
            .await
            .ok()??;
        AudioFrame::from_base64(&chunk.data, 16000).ok()
    }
}

/// Provider stand-in that opens sessions on demand
pub struct ScriptedUpstream {
    release: Option<Arc<Semaphore>>,
    fail: bool,
    sessions: mpsc::UnboundedSender<ScriptedSession>,
}

impl ScriptedUpstream {
    /// Sessions open immediately
    pub fn immediate() -> (Self, mpsc::UnboundedReceiver<ScriptedSession>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                release: None,
                fail: false,
                sessions: tx,
            },
            rx,
        )
    }

    /// Each session opens only once a permit is added to the returned semaphore
    pub fn gated() -> (Self, Arc<Semaphore>, mpsc::UnboundedReceiver<ScriptedSession>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let release = Arc::new(Semaphore::new(0));
        (
            Self {
                release: Some(release.clone()),
                fail: false,
                sessions: tx,
            },
            release,
            rx,
        )
    }

    /// Every connect attempt fails
    pub fn failing() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self {
            release: None,
            fail: true,
            sessions: tx,
        }
    }
}

#[async_trait::async_trait]
impl UpstreamConnector for ScriptedUpstream {
    async fn connect(&self, _setup: &LiveSetup) -> LiveResult<UpstreamSession> {
        if self.fail {
            return Err(LiveError::UpstreamConnect("quota exceeded".to_string()));
        }
        if let Some(release) = &self.release {
            release
                .acquire()
                .await
                .map_err(|e| LiveError::UpstreamConnect(e.to_string()))?
                .forget();
        }

        let (input_tx, input_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(64);
        let _ = self.sessions.send(ScriptedSession {
            inputs: input_rx,
            events: event_tx,
        });

        Ok(UpstreamSession {
            input: input_tx,
            events: event_rx,
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn test_setup() -> LiveSetup {
    LiveSetup {
        model: "models/test".to_string(),
        voice: "Kore".to_string(),
        system_instruction: "Be brief.".to_string(),
    }
}

/// Serve the relay on an ephemeral port
pub async fn spawn_relay(connector: impl UpstreamConnector + 'static, settings: RelaySettings) -> Result<(SocketAddr, AppState)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = AppState::new(Arc::new(connector), test_setup(), settings);

    tokio::spawn(relay::serve_with_listener(listener, state.clone()));
    Ok((addr, state))
}

/// Poll `condition` every 10ms for up to 5s
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Await the next scripted session
pub async fn next_session(rx: &mut mpsc::UnboundedReceiver<ScriptedSession>) -> Result<ScriptedSession> {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("connector dropped"))
}
