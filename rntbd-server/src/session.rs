//! Per-connection session and handshake state machine.

use crate::config::HandshakePolicy;
use crate::error::ServerError;
use rntbd_protocol::{ContextRequest, InboundMessage};
use std::net::SocketAddr;
use std::time::Instant;
use uuid::Uuid;

/// Handshake state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// No context response has been written yet.
    AwaitingContext,
    /// The context response has been written.
    Established,
}

/// A client session. Owned by its connection task, never shared.
pub struct Session {
    /// Unique session ID.
    pub id: String,

    /// Remote address.
    pub remote_addr: SocketAddr,

    state: HandshakeState,
    policy: HandshakePolicy,

    /// Client identity from the context request.
    user_agent: Option<String>,
    client_version: Option<String>,
    protocol_version: Option<u32>,

    /// Frames admitted on this connection, context requests included.
    request_count: u64,

    created_at: Instant,
}

impl Session {
    /// Creates a new session in `AwaitingContext`.
    pub fn new(remote_addr: SocketAddr, policy: HandshakePolicy) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            remote_addr,
            state: HandshakeState::AwaitingContext,
            policy,
            user_agent: None,
            client_version: None,
            protocol_version: None,
            request_count: 0,
            created_at: Instant::now(),
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn policy(&self) -> HandshakePolicy {
        self.policy
    }

    pub fn is_established(&self) -> bool {
        self.state == HandshakeState::Established
    }

    /// Checks a decoded frame against the handshake state.
    ///
    /// Under the strict policy a request before the context request, or a
    /// second context request, is a violation that closes the connection.
    /// The lenient policy admits both.
    pub fn admit(&mut self, message: &InboundMessage) -> Result<(), ServerError> {
        match (self.state, message) {
            (HandshakeState::AwaitingContext, InboundMessage::Request(request)) => {
                if self.policy == HandshakePolicy::Strict {
                    return Err(ServerError::HandshakeViolation(format!(
                        "{}:{} request received before context negotiation",
                        request.resource_type, request.operation_type
                    )));
                }
                tracing::debug!(
                    "[{}] Request before context negotiation, dispatching anyway",
                    self.id
                );
            }
            (HandshakeState::Established, InboundMessage::Context(_)) => {
                if self.policy == HandshakePolicy::Strict {
                    return Err(ServerError::HandshakeViolation(
                        "context request received after negotiation".to_string(),
                    ));
                }
                tracing::debug!("[{}] Repeated context request, answering again", self.id);
            }
            _ => {}
        }

        self.request_count += 1;
        Ok(())
    }

    /// Moves to `Established` once the context response has been written.
    pub fn complete_handshake(&mut self, context: &ContextRequest) {
        self.user_agent = Some(context.user_agent.clone());
        self.client_version = Some(context.client_version.clone());
        self.protocol_version = Some(context.protocol_version);
        self.state = HandshakeState::Established;
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    pub fn client_version(&self) -> Option<&str> {
        self.client_version.as_deref()
    }

    pub fn protocol_version(&self) -> Option<u32> {
        self.protocol_version
    }

    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    /// Returns the session age.
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    /// One-line description of the session for the close log.
    pub fn summary(&self) -> String {
        let client = match (self.user_agent(), self.client_version(), self.protocol_version()) {
            (Some(agent), Some(version), Some(protocol)) => {
                format!("agent={:?} version={:?} protocol={}", agent, version, protocol)
            }
            _ => "no context negotiated".to_string(),
        };
        format!(
            "Session {} closed after {} frame(s) in {:.1?} ({}, handshake {})",
            self.id,
            self.request_count,
            self.age(),
            client,
            self.policy()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rntbd_protocol::{OperationType, Request, ResourceType};
    use std::net::{IpAddr, Ipv4Addr};

    fn test_addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 12345)
    }

    fn context() -> InboundMessage {
        InboundMessage::Context(ContextRequest::new(Uuid::new_v4(), "test-agent"))
    }

    fn read() -> InboundMessage {
        InboundMessage::Request(Request::new(
            ResourceType::DOCUMENT,
            OperationType::READ,
            Uuid::new_v4(),
        ))
    }

    #[test]
    fn test_session_creation() {
        let session = Session::new(test_addr(), HandshakePolicy::Lenient);
        assert_eq!(session.state(), HandshakeState::AwaitingContext);
        assert!(!session.is_established());
        assert_eq!(session.request_count(), 0);
        assert!(session.user_agent().is_none());
    }

    #[test]
    fn test_session_handshake() {
        let mut session = Session::new(test_addr(), HandshakePolicy::Strict);
        let message = context();
        session.admit(&message).unwrap();

        if let InboundMessage::Context(ref request) = message {
            session.complete_handshake(request);
        }
        assert!(session.is_established());
        assert_eq!(session.user_agent(), Some("test-agent"));
        assert_eq!(session.client_version(), Some("2018-09-17"));
        assert_eq!(session.protocol_version(), Some(1));

        session.admit(&read()).unwrap();
        assert_eq!(session.request_count(), 2);
    }

    #[test]
    fn test_session_summary_reports_client_identity() {
        let mut session = Session::new(test_addr(), HandshakePolicy::Lenient);
        assert!(session.summary().contains("no context negotiated"));
        assert!(session.summary().contains("handshake lenient"));

        session.admit(&context()).unwrap();
        session.complete_handshake(&ContextRequest::new(Uuid::new_v4(), "sdk/1.2"));
        let summary = session.summary();
        assert!(summary.contains(&session.id));
        assert!(summary.contains("1 frame(s)"));
        assert!(summary.contains("agent=\"sdk/1.2\""));
        assert!(summary.contains("version=\"2018-09-17\""));
        assert!(summary.contains("protocol=1"));
    }

    #[test]
    fn test_lenient_admits_out_of_order() {
        let mut session = Session::new(test_addr(), HandshakePolicy::Lenient);
        session.admit(&read()).unwrap();
        assert_eq!(session.state(), HandshakeState::AwaitingContext);

        let ctx = ContextRequest::new(Uuid::new_v4(), "a");
        session.complete_handshake(&ctx);
        session.admit(&context()).unwrap();
        assert_eq!(session.request_count(), 2);
    }

    #[test]
    fn test_strict_rejects_request_before_context() {
        let mut session = Session::new(test_addr(), HandshakePolicy::Strict);
        let err = session.admit(&read()).unwrap_err();
        assert!(matches!(err, ServerError::HandshakeViolation(_)));
        assert_eq!(session.request_count(), 0);
    }

    #[test]
    fn test_strict_rejects_repeated_context() {
        let mut session = Session::new(test_addr(), HandshakePolicy::Strict);
        session.complete_handshake(&ContextRequest::new(Uuid::new_v4(), "a"));
        assert!(matches!(
            session.admit(&context()),
            Err(ServerError::HandshakeViolation(_))
        ));
    }
}
