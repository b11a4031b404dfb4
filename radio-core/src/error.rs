//! Error types for the sync core plumbing
//!
//! Only fallible plumbing lives here (transport, codec, configuration).
//! Connection loss, blocked playback and degraded sync are reported to the
//! [`SessionObserver`](crate::session::SessionObserver) as state changes.

use thiserror::Error;

/// Errors raised by the transport, codec and configuration layers
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    #[error("Malformed message: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Session channel closed")]
    ChannelClosed,

    #[error("Not connected to the station")]
    NotConnected,
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        SyncError::WebSocket(Box::new(e))
    }
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        SyncError::Config(e.to_string())
    }
}
