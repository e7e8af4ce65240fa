//! One relay session: a client socket paired with one provider session.
//!
//! `Connecting → Open → Closed | Errored`
//!
//! While connecting, the provider handshake races the client socket: client
//! input is held in a bounded buffer (or dropped) and a client disconnect
//! cancels the handshake. Once open, two tasks forward each direction in
//! arrival order. A client disconnect tears both down; a provider that goes
//! away first still has its queued messages and close frame delivered.

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::registry::{SessionCounters, SessionState};
use super::state::AppState;
use crate::error::LiveError;
use crate::protocol::{ClientMessage, MediaChunk, RelayNotice};
use crate::upstream::{UpstreamEvent, UpstreamSession};

/// Input frames received before the provider session is open.
///
/// Holds at most `capacity` frames; when full the oldest frame is dropped,
/// since stale audio is worth less than fresh audio.
#[derive(Debug)]
pub struct PendingInput {
    frames: VecDeque<MediaChunk>,
    capacity: usize,
    dropped: u64,
}

impl PendingInput {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    pub fn push(&mut self, chunk: MediaChunk) {
        if self.capacity == 0 {
            self.dropped += 1;
            return;
        }
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
            self.dropped += 1;
        }
        self.frames.push_back(chunk);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Frames in arrival order
    pub fn drain(&mut self) -> impl Iterator<Item = MediaChunk> + '_ {
        self.frames.drain(..)
    }
}

/// Why the client → upstream direction stopped
#[derive(Debug)]
enum UplinkEnd {
    ClientClosed,
    UpstreamGone,
}

/// Why the upstream → client direction stopped
#[derive(Debug)]
enum DownlinkEnd {
    UpstreamClosed,
    UpstreamError(String),
    ClientGone,
}

/// Decode one client text frame into forwardable input.
///
/// Malformed frames and unknown message types yield `None`.
fn decode_client_frame(text: &str, session_id: Uuid, counters: &SessionCounters) -> Option<MediaChunk> {
    match ClientMessage::parse(text) {
        Ok(ClientMessage::Input { media }) => Some(media),
        Ok(ClientMessage::Unknown) => {
            debug!(%session_id, "Ignoring unknown client message type");
            None
        }
        Err(e) => {
            counters.malformed.fetch_add(1, Ordering::Relaxed);
            warn!(%session_id, "Dropping malformed client message: {}", e);
            None
        }
    }
}

fn close_message(code: u16, reason: impl Into<Cow<'static, str>>) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

/// Drive one client connection to completion
pub async fn run_session(socket: WebSocket, state: AppState) {
    let guard = state.sessions.register();
    let session_id = guard.id();
    let counters = guard.counters();

    info!(%session_id, "Client connected to Live relay");

    let (mut client_tx, mut client_rx) = socket.split();
    let mut pending = PendingInput::new(state.settings.connecting_buffer_frames);

    // Connecting: no upstream handle exists yet
    let connect = state.connector.connect(&state.setup);
    tokio::pin!(connect);

    let connected = loop {
        tokio::select! {
            result = &mut connect => break result,
            msg = client_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Some(media) = decode_client_frame(&text, session_id, &counters) {
                        pending.push(media);
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                    info!(%session_id, "Client left while provider session was connecting");
                    guard.set_state(SessionState::Closed);
                    return;
                }
                Some(Ok(_)) => {}
            },
        }
    };

    let UpstreamSession { input, events } = match connected {
        Ok(session) => session,
        Err(e) => {
            error!(%session_id, "Failed to connect to provider: {}", e);
            guard.set_state(SessionState::Errored);
            let reason = match e {
                LiveError::UpstreamConnect(_) => "upstream connect failed",
                _ => "upstream unavailable",
            };
            let _ = client_tx.send(close_message(close_code::ERROR, reason)).await;
            return;
        }
    };

    guard.set_state(SessionState::Open);
    counters
        .frames_dropped
        .fetch_add(pending.dropped(), Ordering::Relaxed);

    if client_tx
        .send(Message::Text(RelayNotice::Open.to_json()))
        .await
        .is_err()
    {
        info!(%session_id, "Client went away before session opened");
        guard.set_state(SessionState::Closed);
        return;
    }

    info!(%session_id, buffered = pending.len(), "Live session open");

    // Held frames go first so ordering matches arrival
    for media in pending.drain() {
        if input.send(media).await.is_err() {
            break;
        }
        counters.frames_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    let mut uplink = tokio::spawn(forward_uplink(
        client_rx,
        input,
        session_id,
        Arc::clone(&counters),
    ));
    let mut downlink = tokio::spawn(forward_downlink(
        client_tx,
        events,
        session_id,
        Arc::clone(&counters),
    ));

    // Provider input closing first: the downlink runs to its terminal event
    let final_state = tokio::select! {
        end = &mut uplink => match end {
            Ok(UplinkEnd::UpstreamGone) => {
                debug!(%session_id, "Provider input closed; draining downlink");
                downlink_state((&mut downlink).await, session_id)
            }
            other => {
                downlink.abort();
                debug!(%session_id, "Uplink ended: {:?}", other);
                SessionState::Closed
            }
        },
        end = &mut downlink => {
            uplink.abort();
            downlink_state(end, session_id)
        }
    };

    guard.set_state(final_state);
    info!(
        %session_id,
        state = ?final_state,
        frames = counters.frames_forwarded.load(Ordering::Relaxed),
        messages = counters.messages_forwarded.load(Ordering::Relaxed),
        "Live session ended"
    );
}

fn downlink_state(end: Result<DownlinkEnd, JoinError>, session_id: Uuid) -> SessionState {
    match end {
        Ok(DownlinkEnd::UpstreamError(reason)) => {
            warn!(%session_id, "Provider session failed: {}", reason);
            SessionState::Errored
        }
        Ok(other) => {
            debug!(%session_id, "Downlink ended: {:?}", other);
            SessionState::Closed
        }
        Err(e) => {
            error!(%session_id, "Downlink task failed: {}", e);
            SessionState::Errored
        }
    }
}

/// Client → upstream, verbatim media payloads in arrival order
async fn forward_uplink(
    mut client_rx: SplitStream<WebSocket>,
    input: mpsc::Sender<MediaChunk>,
    session_id: Uuid,
    counters: Arc<SessionCounters>,
) -> UplinkEnd {
    while let Some(msg) = client_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Some(media) = decode_client_frame(&text, session_id, &counters) {
                    if input.send(media).await.is_err() {
                        return UplinkEnd::UpstreamGone;
                    }
                    counters.frames_forwarded.fetch_add(1, Ordering::Relaxed);
                }
            }
            Ok(Message::Binary(data)) => {
                warn!(%session_id, bytes = data.len(), "Ignoring binary client frame");
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(%session_id, "Client socket error: {}", e);
                break;
            }
        }
    }

    info!(%session_id, "Client closed Live session");
    UplinkEnd::ClientClosed
}

/// Upstream → client, provider messages untouched
async fn forward_downlink(
    mut client_tx: SplitSink<WebSocket, Message>,
    mut events: mpsc::Receiver<UpstreamEvent>,
    session_id: Uuid,
    counters: Arc<SessionCounters>,
) -> DownlinkEnd {
    let end = loop {
        match events.recv().await {
            Some(UpstreamEvent::Message(text)) => {
                if client_tx.send(Message::Text(text)).await.is_err() {
                    return DownlinkEnd::ClientGone;
                }
                counters.messages_forwarded.fetch_add(1, Ordering::Relaxed);
            }
            Some(UpstreamEvent::Closed) | None => break DownlinkEnd::UpstreamClosed,
            Some(UpstreamEvent::Error(reason)) => break DownlinkEnd::UpstreamError(reason),
        }
    };

    let close = match &end {
        DownlinkEnd::UpstreamError(_) => close_message(close_code::ERROR, "upstream error"),
        _ => close_message(close_code::NORMAL, "upstream closed"),
    };
    if let Err(e) = client_tx.send(close).await {
        debug!(%session_id, "Client already gone at close: {}", e);
    }

    end
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(tag: &str) -> MediaChunk {
        MediaChunk {
            data: tag.to_string(),
            mime_type: "audio/pcm;rate=16000".to_string(),
        }
    }

    #[test]
    fn test_pending_zero_capacity_drops() {
        let mut pending = PendingInput::new(0);
        pending.push(chunk("a"));
        pending.push(chunk("b"));
        assert!(pending.is_empty());
        assert_eq!(pending.dropped(), 2);
    }

    #[test]
    fn test_pending_keeps_newest_in_order() {
        let mut pending = PendingInput::new(2);
        for tag in ["a", "b", "c"] {
            pending.push(chunk(tag));
        }
        let order: Vec<String> = pending.drain().map(|c| c.data).collect();
        assert_eq!(order, vec!["b", "c"]);
        assert_eq!(pending.dropped(), 1);
    }

    #[test]
    fn test_decode_client_frame() {
        let counters = SessionCounters::default();
        let id = Uuid::new_v4();

        let input = r#"{"type":"input","media":{"data":"AAA=","mimeType":"audio/pcm;rate=16000"}}"#;
        assert_eq!(decode_client_frame(input, id, &counters), Some(MediaChunk {
            data: "AAA=".to_string(),
            mime_type: "audio/pcm;rate=16000".to_string(),
        }));

        assert_eq!(decode_client_frame(r#"{"type":"ping"}"#, id, &counters), None);
        assert_eq!(counters.malformed.load(Ordering::Relaxed), 0);

        assert_eq!(decode_client_frame("{not json", id, &counters), None);
        assert_eq!(counters.malformed.load(Ordering::Relaxed), 1);
    }
}
