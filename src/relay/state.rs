use std::sync::Arc;

use super::registry::SessionRegistry;
use crate::config::RelayConfig;
use crate::upstream::{LiveSetup, UpstreamConnector};

/// Per-session relay limits
#[derive(Debug, Clone, Copy)]
pub struct RelaySettings {
    /// Client input frames held while `Connecting` (0 = drop)
    pub connecting_buffer_frames: usize,
}

impl From<&RelayConfig> for RelaySettings {
    fn from(config: &RelayConfig) -> Self {
        Self {
            connecting_buffer_frames: config.connecting_buffer_frames,
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self::from(&RelayConfig::default())
    }
}

/// Shared relay state for HTTP and WebSocket handlers
#[derive(Clone)]
pub struct AppState {
    /// Active Live sessions (session_id → state)
    pub sessions: SessionRegistry,
    /// Opens one provider session per client connection
    pub connector: Arc<dyn UpstreamConnector>,
    /// Model, voice and system prompt for every provider session
    pub setup: Arc<LiveSetup>,
    pub settings: RelaySettings,
}

impl AppState {
    pub fn new(connector: Arc<dyn UpstreamConnector>, setup: LiveSetup, settings: RelaySettings) -> Self {
        Self {
            sessions: SessionRegistry::new(),
            connector,
            setup: Arc::new(setup),
            settings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_follow_relay_config() {
        let config = RelayConfig {
            connecting_buffer_frames: 8,
            ..Default::default()
        };
        assert_eq!(RelaySettings::from(&config).connecting_buffer_frames, 8);
        assert_eq!(RelaySettings::default().connecting_buffer_frames, 0);
    }
}
