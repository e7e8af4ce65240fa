use thiserror::Error;

/// Failure classes of a Live voice session.
///
/// None of these are retried automatically. A new session has to be started
/// explicitly after any fatal variant.
#[derive(Debug, Error)]
pub enum LiveError {
    /// Microphone access denied or no input device available
    #[error("microphone unavailable: {0}")]
    Permission(String),

    /// The relay could not establish the provider session
    #[error("upstream connect failed: {0}")]
    UpstreamConnect(String),

    /// A single undecodable or unexpectedly shaped message (recoverable)
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// One side of the connection went away
    #[error("transport closed: {0}")]
    TransportClosed(String),

    /// Audio payload could not be interpreted as PCM16
    #[error("audio error: {0}")]
    Audio(String),
}

impl LiveError {
    /// Whether the session has to be torn down after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, LiveError::MalformedMessage(_) | LiveError::Audio(_))
    }
}

impl From<serde_json::Error> for LiveError {
    fn from(e: serde_json::Error) -> Self {
        LiveError::MalformedMessage(e.to_string())
    }
}

impl From<base64::DecodeError> for LiveError {
    fn from(e: base64::DecodeError) -> Self {
        LiveError::Audio(format!("invalid base64 payload: {}", e))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for LiveError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        LiveError::TransportClosed(e.to_string())
    }
}

pub type LiveResult<T> = std::result::Result<T, LiveError>;
