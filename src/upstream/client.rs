use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::messages::{
    is_setup_complete, Content, GenerationConfig, PrebuiltVoiceConfig, RealtimeInputMessage,
    Setup, SetupMessage, SpeechConfig, TextPart, VoiceConfig,
};
use super::{LiveSetup, UpstreamConnector, UpstreamEvent, UpstreamSession};
use crate::config::UpstreamConfig;
use crate::error::{LiveError, LiveResult};
use crate::protocol::MediaChunk;

type ProviderSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connector for the Gemini Live bidirectional streaming endpoint
pub struct GeminiLiveConnector {
    url: String,
    api_key: Option<String>,
    connect_timeout: Duration,
    queue: usize,
}

impl GeminiLiveConnector {
    pub fn new(config: &UpstreamConfig, queue: usize) -> Self {
        // Provider endpoint is wss://; pick the crypto backend once per process
        let _ = rustls::crypto::ring::default_provider().install_default();

        Self {
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            queue: queue.max(1),
        }
    }

    fn setup_message(setup: &LiveSetup) -> SetupMessage {
        let model = if setup.model.starts_with("models/") {
            setup.model.clone()
        } else {
            format!("models/{}", setup.model)
        };

        SetupMessage {
            setup: Setup {
                model,
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: setup.voice.clone(),
                            },
                        },
                    },
                },
                system_instruction: Content {
                    parts: vec![TextPart {
                        text: setup.system_instruction.clone(),
                    }],
                },
            },
        }
    }

    async fn handshake(&self, setup: &LiveSetup) -> LiveResult<ProviderSocket> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| LiveError::UpstreamConnect("API key is not configured".to_string()))?;
        let url = format!("{}?key={}", self.url, api_key);

        let (mut socket, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| LiveError::UpstreamConnect(format!("Failed to reach provider: {}", e)))?;

        let payload = serde_json::to_string(&Self::setup_message(setup))
            .map_err(|e| LiveError::UpstreamConnect(e.to_string()))?;
        socket
            .send(Message::Text(payload))
            .await
            .map_err(|e| LiveError::UpstreamConnect(format!("Failed to send setup: {}", e)))?;

        // The provider acknowledges setup before streaming anything else
        while let Some(msg) = socket.next().await {
            match msg {
                Ok(Message::Text(text)) if is_setup_complete(&text) => return Ok(socket),
                Ok(Message::Binary(bytes)) if is_setup_complete(&String::from_utf8_lossy(&bytes)) => {
                    return Ok(socket)
                }
                Ok(Message::Close(frame)) => {
                    let reason = frame
                        .map(|f| format!("{} ({})", f.reason, u16::from(f.code)))
                        .unwrap_or_else(|| "no close frame".to_string());
                    return Err(LiveError::UpstreamConnect(format!(
                        "Provider rejected setup: {}",
                        reason
                    )));
                }
                Ok(other) => debug!("Ignoring pre-setup provider frame: {:?}", other),
                Err(e) => return Err(LiveError::UpstreamConnect(e.to_string())),
            }
        }

        Err(LiveError::UpstreamConnect(
            "Provider closed before acknowledging setup".to_string(),
        ))
    }
}

#[async_trait::async_trait]
impl UpstreamConnector for GeminiLiveConnector {
    async fn connect(&self, setup: &LiveSetup) -> LiveResult<UpstreamSession> {
        info!("Opening provider session (model={}, voice={})", setup.model, setup.voice);

        let socket = tokio::time::timeout(self.connect_timeout, self.handshake(setup))
            .await
            .map_err(|_| {
                LiveError::UpstreamConnect(format!(
                    "Provider did not acknowledge setup within {:?}",
                    self.connect_timeout
                ))
            })??;

        info!("Provider session ready");

        let (input_tx, input_rx) = mpsc::channel(self.queue);
        let (event_tx, event_rx) = mpsc::channel(self.queue);
        tokio::spawn(pump(socket, input_rx, event_tx));

        Ok(UpstreamSession {
            input: input_tx,
            events: event_rx,
        })
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn name(&self) -> &str {
        "gemini-live"
    }
}

/// Owns the provider socket for the lifetime of one session
async fn pump(
    socket: ProviderSocket,
    mut input_rx: mpsc::Receiver<MediaChunk>,
    event_tx: mpsc::Sender<UpstreamEvent>,
) {
    let (mut sink, mut stream) = socket.split();

    let ending = loop {
        tokio::select! {
            chunk = input_rx.recv() => match chunk {
                Some(chunk) => {
                    let payload = match serde_json::to_string(&RealtimeInputMessage::new(chunk)) {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!("Failed to encode realtime input: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(payload)).await {
                        break Some(UpstreamEvent::Error(format!("Provider send failed: {}", e)));
                    }
                }
                None => {
                    // Relay side of the session is gone
                    let _ = sink.send(Message::Close(None)).await;
                    break None;
                }
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if event_tx.send(UpstreamEvent::Message(text)).await.is_err() {
                        let _ = sink.send(Message::Close(None)).await;
                        break None;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        if event_tx.send(UpstreamEvent::Message(text)).await.is_err() {
                            let _ = sink.send(Message::Close(None)).await;
                            break None;
                        }
                    }
                    Err(e) => warn!("Dropping non-UTF-8 provider frame: {}", e),
                },
                Some(Ok(Message::Close(frame))) => {
                    break Some(match frame {
                        Some(f) if !matches!(f.code, CloseCode::Normal | CloseCode::Away) => {
                            UpstreamEvent::Error(format!("{} ({})", f.reason, u16::from(f.code)))
                        }
                        _ => UpstreamEvent::Closed,
                    });
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Some(UpstreamEvent::Error(e.to_string())),
                None => break Some(UpstreamEvent::Closed),
            },
        }
    };

    if let Some(event) = ending {
        info!("Provider session ended: {:?}", event);
        let _ = event_tx.send(event).await;
    } else {
        debug!("Provider session released by relay");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_message_shape() {
        let setup = LiveSetup {
            model: "gemini-live-test".to_string(),
            voice: "Kore".to_string(),
            system_instruction: "Be brief.".to_string(),
        };

        let json = serde_json::to_value(GeminiLiveConnector::setup_message(&setup)).unwrap();
        assert_eq!(json["setup"]["model"], "models/gemini-live-test");
        assert_eq!(json["setup"]["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            json["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Kore"
        );
        assert_eq!(json["setup"]["systemInstruction"]["parts"][0]["text"], "Be brief.");
    }

    #[test]
    fn test_realtime_input_shape() {
        let msg = RealtimeInputMessage::new(MediaChunk {
            data: "AAA=".to_string(),
            mime_type: "audio/pcm;rate=16000".to_string(),
        });
        let json = serde_json::to_value(msg).unwrap();
        assert_eq!(json["realtimeInput"]["mediaChunks"][0]["mimeType"], "audio/pcm;rate=16000");
    }

    #[test]
    fn test_session_queue_sized_from_relay_config() {
        let relay = crate::config::RelayConfig::default();
        let connector = GeminiLiveConnector::new(&UpstreamConfig::default(), relay.outbound_queue);
        assert_eq!(connector.queue, 256);

        // tokio channels need room for at least one message
        assert_eq!(GeminiLiveConnector::new(&UpstreamConfig::default(), 0).queue, 1);
    }

    #[tokio::test]
    async fn test_missing_key_is_connect_error() {
        let config = UpstreamConfig {
            api_key: None,
            ..UpstreamConfig::default()
        };
        let connector = GeminiLiveConnector::new(&config, 8);
        assert!(!connector.is_configured());

        let setup = LiveSetup::from(&config);
        match connector.connect(&setup).await {
            Err(LiveError::UpstreamConnect(msg)) => assert!(msg.contains("API key")),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("connect without key should fail"),
        }
    }
}
