//! Server error types.

use crate::config::ConfigError;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] rntbd_protocol::ProtocolError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("handshake violation: {0}")]
    HandshakeViolation(String),

    #[error("fixture error: {0}")]
    Fixture(String),

    #[error("server shutting down")]
    ShuttingDown,

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),
}

impl ServerError {
    /// Returns whether the error ends only the connection it occurred on,
    /// as opposed to preventing the server from starting.
    pub fn is_connection_scoped(&self) -> bool {
        matches!(
            self,
            ServerError::Io(_)
                | ServerError::Protocol(_)
                | ServerError::HandshakeViolation(_)
                | ServerError::ShuttingDown
                | ServerError::TlsHandshake(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rntbd_protocol::ProtocolError;

    #[test]
    fn test_error_display() {
        let err = ServerError::from(ProtocolError::FrameTooLarge { size: 10, max: 5 });
        assert!(err.to_string().starts_with("protocol error:"));

        let err = ServerError::HandshakeViolation("request before context".into());
        assert_eq!(
            err.to_string(),
            "handshake violation: request before context"
        );
    }

    #[test]
    fn test_connection_scoped() {
        assert!(ServerError::ShuttingDown.is_connection_scoped());
        assert!(ServerError::HandshakeViolation(String::new()).is_connection_scoped());
        assert!(!ServerError::Fixture("bad json".into()).is_connection_scoped());
        assert!(!ServerError::TlsConfig("no cert".into()).is_connection_scoped());
    }
}
