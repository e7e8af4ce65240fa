pub mod audio;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod upstream;

pub use audio::{AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFile, AudioFrame, AudioSource};
pub use client::{ConnectionStatus, LiveClient, LiveHandle, PlaybackEvent, PlaybackOutput, PlaybackScheduler};
pub use config::Config;
pub use error::{LiveError, LiveResult};
pub use protocol::{ClientMessage, ServerMessage};
pub use relay::{create_router, AppState};
pub use upstream::{GeminiLiveConnector, LiveSetup, UpstreamConnector};
