//! Client error types.

use thiserror::Error;
use uuid::Uuid;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] rntbd_protocol::ProtocolError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timeout")]
    Timeout,

    #[error("server returned status {status} (activity {activity_id})")]
    ServerStatus { status: u32, activity_id: Uuid },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::Timeout => true,
            ClientError::ConnectionClosed => true,
            // Request timeout, gone, throttled, retry-with, unavailable.
            ClientError::ServerStatus { status, .. } => {
                matches!(status, 408 | 410 | 429 | 449 | 503)
            }
            _ => false,
        }
    }
}
