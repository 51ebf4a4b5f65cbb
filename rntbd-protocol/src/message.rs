//! Inbound message types: the context request and ordinary requests.

use crate::error::{ensure_remaining, ProtocolError};
use crate::frame::{self, check_frame_length, RequestFrame};
use crate::registry::{context_request, context_request_headers, request, request_headers};
use crate::resource::{OperationType, ResourceType};
use crate::stream::TokenStream;
use crate::token::TokenValue;
use bytes::{Bytes, BytesMut};
use serde::Serialize;
use uuid::Uuid;

/// Connection negotiation request, the first frame on every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextRequest {
    pub activity_id: Uuid,
    pub protocol_version: u32,
    pub client_version: String,
    pub user_agent: String,
    pub caller_id: Option<u8>,
    pub enable_channel_multiplexing: bool,
}

impl ContextRequest {
    pub fn new(activity_id: Uuid, user_agent: impl Into<String>) -> Self {
        Self {
            activity_id,
            protocol_version: crate::CURRENT_PROTOCOL_VERSION,
            client_version: crate::CURRENT_CLIENT_VERSION.to_string(),
            user_agent: user_agent.into(),
            caller_id: None,
            enable_channel_multiplexing: false,
        }
    }

    fn headers(&self) -> Result<TokenStream, ProtocolError> {
        let mut headers = TokenStream::new(context_request_headers());
        headers.set(
            context_request::PROTOCOL_VERSION,
            TokenValue::ULong(self.protocol_version),
        )?;
        headers.set(
            context_request::CLIENT_VERSION,
            TokenValue::SmallString(self.client_version.clone()),
        )?;
        headers.set(
            context_request::USER_AGENT,
            TokenValue::SmallString(self.user_agent.clone()),
        )?;
        if let Some(caller_id) = self.caller_id {
            headers.set(context_request::CALLER_ID, TokenValue::Byte(caller_id))?;
        }
        if self.enable_channel_multiplexing {
            headers.set(
                context_request::ENABLE_CHANNEL_MULTIPLEXING,
                TokenValue::Byte(1),
            )?;
        }
        Ok(headers)
    }

    pub fn encode(&self, out: &mut BytesMut) -> Result<(), ProtocolError> {
        let headers = self.headers()?;
        let prefix = RequestFrame::new(
            ResourceType::CONNECTION,
            OperationType::CONNECTION,
            self.activity_id,
            headers.compute_length(),
        )?;
        prefix.encode(out);
        headers.encode(out)
    }

    /// Decodes a delimited frame. Absent headers fall back to empty values.
    pub fn decode(mut frame: Bytes) -> Result<Self, ProtocolError> {
        let whole = frame.clone();
        let prefix = RequestFrame::decode(&mut frame)?;
        check_frame_length(prefix.length, &whole)?;
        let headers = TokenStream::decode(context_request_headers(), frame)?;

        Ok(Self {
            activity_id: prefix.activity_id,
            protocol_version: headers
                .get_u32(context_request::PROTOCOL_VERSION)
                .unwrap_or_default(),
            client_version: headers
                .get_str(context_request::CLIENT_VERSION)
                .unwrap_or_default()
                .to_string(),
            user_agent: headers
                .get_str(context_request::USER_AGENT)
                .unwrap_or_default()
                .to_string(),
            caller_id: headers.get_u8(context_request::CALLER_ID),
            enable_channel_multiplexing: headers
                .get_u8(context_request::ENABLE_CHANNEL_MULTIPLEXING)
                .is_some_and(|v| v != 0),
        })
    }
}

/// An ordinary request: frame prefix, request headers and optional payload.
#[derive(Debug, Clone)]
pub struct Request {
    pub resource_type: ResourceType,
    pub operation_type: OperationType,
    pub activity_id: Uuid,
    pub headers: TokenStream,
    pub payload: Option<Bytes>,
}

impl Request {
    /// Creates a request with `PayloadPresent` cleared.
    pub fn new(
        resource_type: ResourceType,
        operation_type: OperationType,
        activity_id: Uuid,
    ) -> Self {
        let mut headers = TokenStream::new(request_headers());
        // PayloadPresent is a registered Byte header, so this cannot fail.
        let _ = headers.set(request::PAYLOAD_PRESENT, TokenValue::Byte(0));
        Self {
            resource_type,
            operation_type,
            activity_id,
            headers,
            payload: None,
        }
    }

    pub fn with_header(mut self, id: u16, value: TokenValue) -> Result<Self, ProtocolError> {
        self.headers.set(id, value)?;
        Ok(self)
    }

    pub fn with_payload(mut self, payload: Bytes) -> Self {
        let _ = self
            .headers
            .set(request::PAYLOAD_PRESENT, TokenValue::Byte(1));
        self.payload = Some(payload);
        self
    }

    /// Transport request id used to correlate the response. Zero for the
    /// connection resource type or when the header is absent.
    pub fn transport_request_id(&self) -> u32 {
        if self.resource_type.is_connection() {
            return 0;
        }
        self.headers
            .get_u32(request::TRANSPORT_REQUEST_ID)
            .unwrap_or(0)
    }

    /// Whether a payload block follows the frame on the wire.
    pub fn payload_present(&self) -> bool {
        self.headers
            .get_u8(request::PAYLOAD_PRESENT)
            .is_some_and(|v| v != 0)
    }

    pub fn encode(&self, out: &mut BytesMut) -> Result<(), ProtocolError> {
        let prefix = RequestFrame::new(
            self.resource_type,
            self.operation_type,
            self.activity_id,
            self.headers.compute_length(),
        )?;
        prefix.encode(out);
        self.headers.encode(out)?;
        if self.payload_present() {
            frame::encode_payload(self.payload.as_deref().unwrap_or_default(), out)?;
        }
        Ok(())
    }

    /// Decodes a delimited frame. The payload block, if any, is read
    /// separately by the stream decoder.
    ///
    /// Resource type zero carries no request headers, so its token bytes
    /// are not interpreted.
    pub fn decode(mut frame: Bytes) -> Result<Self, ProtocolError> {
        let whole = frame.clone();
        let prefix = RequestFrame::decode(&mut frame)?;
        check_frame_length(prefix.length, &whole)?;

        let headers = if prefix.resource_type.is_connection() {
            TokenStream::new(request_headers())
        } else {
            TokenStream::decode(request_headers(), frame)?
        };

        Ok(Self {
            resource_type: prefix.resource_type,
            operation_type: prefix.operation_type,
            activity_id: prefix.activity_id,
            headers,
            payload: None,
        })
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    Context(ContextRequest),
    Request(Request),
}

impl InboundMessage {
    /// Decodes a delimited frame, routing `(0, 0)` to the context path.
    pub fn decode(frame: Bytes) -> Result<Self, ProtocolError> {
        ensure_remaining("request frame prefix", 8, frame.len())?;
        let resource_type = u16::from_le_bytes([frame[4], frame[5]]);
        let operation_type = u16::from_le_bytes([frame[6], frame[7]]);

        if resource_type == 0 && operation_type == 0 {
            Ok(InboundMessage::Context(ContextRequest::decode(frame)?))
        } else {
            Ok(InboundMessage::Request(Request::decode(frame)?))
        }
    }

    pub fn activity_id(&self) -> Uuid {
        match self {
            InboundMessage::Context(context) => context.activity_id,
            InboundMessage::Request(request) => request.activity_id,
        }
    }

    pub fn is_context(&self) -> bool {
        matches!(self, InboundMessage::Context(_))
    }

    pub fn encode(&self, out: &mut BytesMut) -> Result<(), ProtocolError> {
        match self {
            InboundMessage::Context(context) => context.encode(out),
            InboundMessage::Request(request) => request.encode(out),
        }
    }
}
