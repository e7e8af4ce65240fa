use anyhow::Result;
use serde::Deserialize;

use crate::audio::codec::{FRAME_SAMPLES, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};

/// Placeholder value shipped in sample env files
const PLACEHOLDER_API_KEY: &str = "PLACEHOLDER_API_KEY";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub relay: RelayConfig,
    pub upstream: UpstreamConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub bind: String,
    pub port: u16,
    /// Client input frames held while the provider session is connecting
    /// (0 drops them)
    pub connecting_buffer_frames: usize,
    /// Capacity of each provider session's input and event queues
    pub outbound_queue: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 3001,
            connecting_buffer_frames: 0,
            outbound_queue: 256,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Provider WebSocket endpoint
    pub url: String,
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    pub connect_timeout_secs: u64,
    /// Read from API_KEY / GEMINI_API_KEY, never from the config file
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
            model: "gemini-2.5-flash-native-audio-preview-12-2025".to_string(),
            voice: "Kore".to_string(),
            system_instruction: "You are Treez Live, a real-time conversational intelligence developed by Treez Intelligence. Be concise, engaging, and friendly.".to_string(),
            connect_timeout_secs: 15,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Relay WebSocket URL
    pub url: String,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub frame_samples: usize,
    /// Encoded frames waiting for the socket before new ones are dropped
    pub uplink_queue: usize,
    /// Event loop tick for playback completion and visualizer refresh
    pub tick_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:3001/".to_string(),
            input_sample_rate: INPUT_SAMPLE_RATE,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            frame_samples: FRAME_SAMPLES,
            uplink_queue: 32,
            tick_ms: 16,
        }
    }
}

impl Config {
    /// Load `path` (optional TOML) layered under `TREEZ__SECTION__KEY`
    /// environment variables, then apply `PORT` and the API credential.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("TREEZ").separator("__"))
            .build()?;

        let mut cfg: Config = settings.try_deserialize()?;

        if let Ok(port) = std::env::var("PORT") {
            if let Ok(port) = port.parse() {
                cfg.relay.port = port;
            }
        }
        cfg.upstream.api_key = resolve_api_key(
            std::env::var("API_KEY").ok(),
            std::env::var("GEMINI_API_KEY").ok(),
        );

        Ok(cfg)
    }
}

/// First usable credential, ignoring empty and placeholder values
pub fn resolve_api_key(primary: Option<String>, fallback: Option<String>) -> Option<String> {
    [primary, fallback]
        .into_iter()
        .flatten()
        .map(|key| key.trim().to_string())
        .find(|key| !key.is_empty() && key != PLACEHOLDER_API_KEY)
}
