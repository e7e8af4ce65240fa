use serde::{Deserialize, Serialize};

use crate::audio::codec::{is_pcm_mime, parse_pcm_rate, AudioFrame, OUTPUT_SAMPLE_RATE};
use crate::error::LiveResult;

/// One base64 audio chunk with its mime type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    /// Base64-encoded PCM bytes
    pub data: String,
    pub mime_type: String,
}

impl MediaChunk {
    pub fn from_frame(frame: &AudioFrame) -> Self {
        Self {
            data: frame.to_base64(),
            mime_type: frame.mime_type(),
        }
    }
}

/// Client → relay message
///
/// Message types this build does not know decode to `Unknown` and are
/// ignored by the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "input")]
    Input { media: MediaChunk },
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    pub fn input(frame: &AudioFrame) -> Self {
        ClientMessage::Input {
            media: MediaChunk::from_frame(frame),
        }
    }

    pub fn parse(text: &str) -> LiveResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> LiveResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Relay-originated notices (not produced by the upstream provider)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RelayNotice {
    /// Upstream session is ready; the client may start streaming
    Open,
}

impl RelayNotice {
    pub fn to_json(&self) -> String {
        match self {
            RelayNotice::Open => r#"{"type":"open"}"#.to_string(),
        }
    }
}

/// Relay → client message.
///
/// Covers the relay's own notices (`type`) and the provider's server messages
/// forwarded verbatim. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_content: Option<ServerContent>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_complete: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_turn: Option<ModelTurn>,

    /// The user started talking over the model; flush playback
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub interrupted: bool,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<MediaChunk>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ServerMessage {
    pub fn parse(text: &str) -> LiveResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> LiveResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Model-turn message carrying one audio part
    pub fn audio(frame: &AudioFrame) -> Self {
        Self {
            server_content: Some(ServerContent {
                model_turn: Some(ModelTurn {
                    parts: vec![Part {
                        inline_data: Some(MediaChunk::from_frame(frame)),
                        text: None,
                    }],
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn interrupted() -> Self {
        Self {
            server_content: Some(ServerContent {
                interrupted: true,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn is_open(&self) -> bool {
        self.kind.as_deref() == Some("open")
    }

    pub fn is_interrupted(&self) -> bool {
        self.server_content.as_ref().is_some_and(|c| c.interrupted)
    }

    pub fn is_turn_complete(&self) -> bool {
        self.server_content.as_ref().is_some_and(|c| c.turn_complete)
    }

    fn inline_parts(&self) -> impl Iterator<Item = &MediaChunk> {
        self.server_content
            .iter()
            .filter_map(|c| c.model_turn.as_ref())
            .flat_map(|turn| turn.parts.iter())
            .filter_map(|p| p.inline_data.as_ref())
    }

    /// Inline audio parts of the model turn, in order.
    ///
    /// Parts whose mime type is not PCM are skipped, as are PCM parts with an
    /// unusable (zero or unparsable) rate; a PCM part without a rate
    /// parameter is assumed to be 24kHz.
    pub fn audio_parts(&self) -> Vec<(&MediaChunk, u32)> {
        self.inline_parts()
            .filter_map(|chunk| parse_pcm_rate(&chunk.mime_type, OUTPUT_SAMPLE_RATE).map(|rate| (chunk, rate)))
            .collect()
    }

    /// PCM parts left out of [`audio_parts`](Self::audio_parts) because their rate is unusable
    pub fn rejected_audio_parts(&self) -> usize {
        self.inline_parts()
            .filter(|chunk| is_pcm_mime(&chunk.mime_type))
            .filter(|chunk| parse_pcm_rate(&chunk.mime_type, OUTPUT_SAMPLE_RATE).is_none())
            .count()
    }
}
