use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::capture::AudioCapture;
use super::downlink::{Downlink, DownlinkEvent};
use super::playback::{BufferId, PlaybackOutput, PlaybackScheduler, ScheduledBuffer};
use super::status::ConnectionStatus;
use super::uplink::{Uplink, UplinkGate, UplinkStats};
use super::visualizer::{Visualizer, WINDOW_SIZE};
use crate::config::ClientConfig;
use crate::error::{LiveError, LiveResult};

/// Observable playback activity, for UIs and tests
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Scheduled(ScheduledBuffer),
    Ended(BufferId),
    Interrupted { stopped: usize },
    TurnComplete,
}

#[derive(Debug, Default)]
struct ClientCounters {
    buffers_scheduled: AtomicU64,
    buffers_ended: AtomicU64,
    interruptions: AtomicU64,
    active_buffers: AtomicUsize,
    malformed_messages: AtomicU64,
}

/// Statistics about a Live client session
#[derive(Debug, Clone, Serialize)]
pub struct ClientStats {
    pub status: ConnectionStatus,

    /// When `connect` was called
    pub started_at: DateTime<Utc>,

    pub duration_secs: f64,

    /// Input frames handed to the relay socket
    pub frames_sent: u64,
    pub frames_dropped_muted: u64,
    pub frames_dropped_not_open: u64,
    pub frames_dropped_backpressure: u64,
    pub frames_dropped_encoding: u64,

    /// Model audio buffers placed on the playback timeline
    pub buffers_scheduled: u64,
    pub buffers_ended: u64,
    pub interruptions: u64,
    pub active_buffers: usize,
    pub malformed_messages: u64,
}

/// Entry point for one voice session against a relay
pub struct LiveClient {
    config: ClientConfig,
    muted: bool,
    visualize: bool,
}

impl LiveClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            muted: false,
            visualize: false,
        }
    }

    /// Start muted
    pub fn muted(mut self, muted: bool) -> Self {
        self.muted = muted;
        self
    }

    /// Publish rendered visualizer lines through [`LiveHandle::visual`]
    pub fn visualize(mut self, visualize: bool) -> Self {
        self.visualize = visualize;
        self
    }

    /// Spawn the session event loop.
    ///
    /// Status is `connecting` on return. It becomes `connected` once the relay
    /// reports the upstream session open, and ends as `disconnected` or
    /// `error`. Nothing reconnects automatically.
    pub fn connect<O>(self, capture: AudioCapture, output: O) -> LiveHandle
    where
        O: PlaybackOutput + 'static,
    {
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events_tx, _) = broadcast::channel(256);
        let (visual_tx, visual_rx) = watch::channel(String::new());

        let gate = Arc::new(UplinkGate::new(self.muted));
        let (uplink, outbound) = Uplink::new(self.config.input_sample_rate, self.config.uplink_queue, gate.clone());
        let uplink_stats = uplink.stats().clone();
        let counters = Arc::new(ClientCounters::default());

        let event_loop = EventLoop {
            config: self.config,
            status: status_tx,
            events: events_tx.clone(),
            visual: self.visualize.then_some(visual_tx),
            counters: counters.clone(),
            gate: gate.clone(),
        };
        let task = tokio::spawn(event_loop.run(capture, output, uplink, outbound, shutdown_rx));

        LiveHandle {
            status: status_rx,
            shutdown: shutdown_tx,
            events: events_tx,
            visual: visual_rx,
            gate,
            uplink_stats,
            counters,
            started_at: Utc::now(),
            task,
        }
    }
}

/// Control surface of a running Live session
pub struct LiveHandle {
    status: watch::Receiver<ConnectionStatus>,
    shutdown: watch::Sender<bool>,
    events: broadcast::Sender<PlaybackEvent>,
    visual: watch::Receiver<String>,
    gate: Arc<UplinkGate>,
    uplink_stats: Arc<UplinkStats>,
    counters: Arc<ClientCounters>,
    started_at: DateTime<Utc>,
    task: JoinHandle<LiveResult<()>>,
}

impl LiveHandle {
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Takes effect at the next captured frame
    pub fn set_muted(&self, muted: bool) {
        self.gate.set_muted(muted);
        info!("Microphone {}", if muted { "muted" } else { "unmuted" });
    }

    pub fn is_muted(&self) -> bool {
        self.gate.is_muted()
    }

    /// Stop playback, close the relay socket and release capture
    pub fn disconnect(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    /// Latest rendered visualizer line (empty unless enabled)
    pub fn visual(&self) -> watch::Receiver<String> {
        self.visual.clone()
    }

    pub fn stats(&self) -> ClientStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        ClientStats {
            status: self.status(),
            started_at: self.started_at,
            duration_secs: (Utc::now() - self.started_at).num_milliseconds() as f64 / 1000.0,
            frames_sent: load(&self.uplink_stats.sent),
            frames_dropped_muted: load(&self.uplink_stats.dropped_muted),
            frames_dropped_not_open: load(&self.uplink_stats.dropped_not_open),
            frames_dropped_backpressure: load(&self.uplink_stats.dropped_backpressure),
            frames_dropped_encoding: load(&self.uplink_stats.dropped_encoding),
            buffers_scheduled: load(&self.counters.buffers_scheduled),
            buffers_ended: load(&self.counters.buffers_ended),
            interruptions: load(&self.counters.interruptions),
            active_buffers: self.counters.active_buffers.load(Ordering::Relaxed),
            malformed_messages: load(&self.counters.malformed_messages),
        }
    }

    /// Wait for the session to end and return how it ended
    pub async fn join(self) -> LiveResult<()> {
        let LiveHandle { shutdown, task, .. } = self;
        let result = task
            .await
            .map_err(|e| LiveError::TransportClosed(format!("client task failed: {}", e)))?;
        drop(shutdown);
        result
    }
}

struct EventLoop {
    config: ClientConfig,
    status: watch::Sender<ConnectionStatus>,
    events: broadcast::Sender<PlaybackEvent>,
    visual: Option<watch::Sender<String>>,
    counters: Arc<ClientCounters>,
    gate: Arc<UplinkGate>,
}

impl EventLoop {
    async fn run<O: PlaybackOutput>(
        self,
        mut capture: AudioCapture,
        output: O,
        uplink: Uplink,
        mut outbound: mpsc::Receiver<String>,
        mut shutdown: watch::Receiver<bool>,
    ) -> LiveResult<()> {
        let mut scheduler = PlaybackScheduler::new(output);

        let result = self
            .drive(&mut capture, &mut scheduler, uplink, &mut outbound, &mut shutdown)
            .await;

        self.gate.set_open(false);
        scheduler.interrupt();
        self.counters.active_buffers.store(0, Ordering::Relaxed);
        capture.stop().await;
        if let Err(e) = scheduler.output_mut().finish() {
            warn!("Failed to finish {} output: {:#}", scheduler.output().name(), e);
        }

        match &result {
            Ok(()) => {
                info!("Live session disconnected");
                self.status.send_replace(ConnectionStatus::Disconnected);
            }
            Err(e) => {
                error!("Live session failed: {}", e);
                self.status.send_replace(ConnectionStatus::Error);
            }
        }
        result
    }

    async fn drive<O: PlaybackOutput>(
        &self,
        capture: &mut AudioCapture,
        scheduler: &mut PlaybackScheduler<O>,
        uplink: Uplink,
        outbound: &mut mpsc::Receiver<String>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> LiveResult<()> {
        capture.start(uplink).await?;

        let url = self.config.url.as_str();
        info!("Connecting to relay at {}", url);
        let socket = tokio::select! {
            connected = tokio_tungstenite::connect_async(url) => connected
                .map(|(socket, _)| socket)
                .map_err(|e| LiveError::TransportClosed(format!("connect to {} failed: {}", url, e)))?,
            _ = shutdown.changed() => return Ok(()),
        };
        info!("Relay socket open, waiting for upstream session");

        let (mut sink, mut stream) = socket.split();
        let mut downlink = Downlink::new();
        let mut visualizer = self.visual.as_ref().map(|_| Visualizer::new());

        let mut ticker = interval(Duration::from_millis(self.config.tick_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Disconnect requested");
                    let close = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client disconnect".into(),
                    };
                    if let Err(e) = sink.send(Message::Close(Some(close))).await {
                        debug!("Close frame not delivered: {}", e);
                    }
                    return Ok(());
                }

                Some(text) = outbound.recv() => {
                    sink.send(Message::Text(text)).await?;
                }

                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        self.receive(&mut downlink, &text, scheduler);
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        self.receive_binary(&mut downlink, bytes, scheduler);
                    }
                    Some(Ok(Message::Close(frame))) => return close_outcome(frame),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(LiveError::TransportClosed(e.to_string())),
                    None => {
                        info!("Relay socket ended");
                        return Ok(());
                    }
                },

                _ = ticker.tick() => {
                    for id in scheduler.poll_ended() {
                        self.counters.buffers_ended.fetch_add(1, Ordering::Relaxed);
                        let _ = self.events.send(PlaybackEvent::Ended(id));
                    }
                    self.counters.active_buffers.store(scheduler.active_len(), Ordering::Relaxed);

                    if let (Some(viz), Some(visual)) = (visualizer.as_mut(), self.visual.as_ref()) {
                        viz.tap(&scheduler.output().recent_output(WINDOW_SIZE));
                        visual.send_replace(viz.render());
                    }
                }
            }
        }
    }

    /// Decode one relay message and act on it
    fn receive<O: PlaybackOutput>(&self, downlink: &mut Downlink, text: &str, scheduler: &mut PlaybackScheduler<O>) {
        let before = downlink.malformed();
        let events = downlink.decode(text);
        self.counters
            .malformed_messages
            .fetch_add(downlink.malformed() - before, Ordering::Relaxed);
        self.apply(events, scheduler);
    }

    /// Some proxies turn text frames into binary ones; the payload is the same JSON
    fn receive_binary<O: PlaybackOutput>(
        &self,
        downlink: &mut Downlink,
        bytes: Vec<u8>,
        scheduler: &mut PlaybackScheduler<O>,
    ) {
        match String::from_utf8(bytes) {
            Ok(text) => self.receive(downlink, &text, scheduler),
            Err(_) => {
                self.counters.malformed_messages.fetch_add(1, Ordering::Relaxed);
                warn!("Dropping non-UTF-8 binary message from relay");
            }
        }
    }

    fn apply<O: PlaybackOutput>(&self, events: Vec<DownlinkEvent>, scheduler: &mut PlaybackScheduler<O>) {
        for event in events {
            match event {
                DownlinkEvent::Open => {
                    self.gate.set_open(true);
                    self.status.send_replace(ConnectionStatus::Connected);
                    info!("Live session connected");
                }
                DownlinkEvent::Audio(frames) => {
                    for frame in &frames {
                        match scheduler.schedule(frame) {
                            Ok(buffer) => {
                                self.counters.buffers_scheduled.fetch_add(1, Ordering::Relaxed);
                                let _ = self.events.send(PlaybackEvent::Scheduled(buffer));
                            }
                            Err(e) => warn!("Failed to schedule model audio: {:#}", e),
                        }
                    }
                }
                DownlinkEvent::Interrupted => {
                    let stopped = scheduler.interrupt();
                    self.counters.interruptions.fetch_add(1, Ordering::Relaxed);
                    let _ = self.events.send(PlaybackEvent::Interrupted { stopped });
                }
                DownlinkEvent::TurnComplete => {
                    let _ = self.events.send(PlaybackEvent::TurnComplete);
                }
            }
        }
        self.counters.active_buffers.store(scheduler.active_len(), Ordering::Relaxed);
    }
}

/// 1011 means the relay lost its upstream; everything else is an ordinary close
fn close_outcome(frame: Option<CloseFrame<'static>>) -> LiveResult<()> {
    match frame {
        Some(frame) if frame.code == CloseCode::Error => {
            Err(LiveError::UpstreamConnect(frame.reason.into_owned()))
        }
        Some(frame) if frame.code == CloseCode::Protocol => {
            Err(LiveError::TransportClosed(frame.reason.into_owned()))
        }
        frame => {
            info!("Relay closed the session ({:?})", frame.map(|f| f.code));
            Ok(())
        }
    }
}
