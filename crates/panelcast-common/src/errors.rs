use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Failures reported by a peer connection object.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("invalid session description: {0}")]
    InvalidDescription(String),

    #[error("invalid ice candidate: {0}")]
    InvalidCandidate(String),

    #[error("invalid connection state: {0}")]
    InvalidState(String),

    #[error("control channel not open: {0}")]
    ChannelNotOpen(String),

    #[error("connection closed")]
    Closed,

    #[error("transport error: {0}")]
    Other(String),
}

/// Failures reported by the window, capture and input collaborators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("source not found: {0}")]
    SourceNotFound(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("input injection failed: {0}")]
    Injection(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PanelcastError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("tls error: {0}")]
    Tls(String),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for PanelcastError {
    fn from(e: serde_json::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}
