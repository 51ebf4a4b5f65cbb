//! Outbound message types.
//!
//! Every response starts with a [`ResponseStatus`] prefix carrying the
//! activity id of the request it answers. The activity id is the only
//! correlation between a request and its response.

use crate::error::ProtocolError;
use crate::frame::{self, check_frame_length, ResponseStatus};
use crate::registry::{
    context_response, context_response_headers, response, response_header_id,
    response_header_name, response_headers,
};
use crate::stream::TokenStream;
use crate::token::TokenValue;
use bytes::{Bytes, BytesMut};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

/// Status codes used by the mock.
pub mod status {
    pub const OK: u32 = 200;
    pub const NOT_FOUND: u32 = 404;
    pub const INTERNAL_SERVER_ERROR: u32 = 500;
}

/// Server side of the connection negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextResponse {
    pub activity_id: Uuid,
    pub status_code: u32,
    pub client_version: String,
    pub protocol_version: u32,
    pub server_agent: String,
    pub server_version: String,
    pub idle_timeout_secs: u32,
    pub unauthenticated_timeout_secs: u32,
}

impl ContextResponse {
    fn headers(&self) -> Result<TokenStream, ProtocolError> {
        let mut headers = TokenStream::new(context_response_headers());
        headers.set(
            context_response::PROTOCOL_VERSION,
            TokenValue::ULong(self.protocol_version),
        )?;
        headers.set(
            context_response::CLIENT_VERSION,
            TokenValue::SmallString(self.client_version.clone()),
        )?;
        headers.set(
            context_response::SERVER_AGENT,
            TokenValue::SmallString(self.server_agent.clone()),
        )?;
        headers.set(
            context_response::SERVER_VERSION,
            TokenValue::SmallString(self.server_version.clone()),
        )?;
        headers.set(
            context_response::IDLE_TIMEOUT_IN_SECONDS,
            TokenValue::ULong(self.idle_timeout_secs),
        )?;
        headers.set(
            context_response::UNAUTHENTICATED_TIMEOUT_IN_SECONDS,
            TokenValue::ULong(self.unauthenticated_timeout_secs),
        )?;
        Ok(headers)
    }

    pub fn encode(&self, out: &mut BytesMut) -> Result<(), ProtocolError> {
        let headers = self.headers()?;
        let prefix = ResponseStatus::new(self.status_code, self.activity_id, headers.compute_length())?;
        prefix.encode(out);
        headers.encode(out)
    }

    pub fn decode(mut frame: Bytes) -> Result<Self, ProtocolError> {
        let whole = frame.clone();
        let prefix = ResponseStatus::decode(&mut frame)?;
        check_frame_length(prefix.length, &whole)?;
        let headers = TokenStream::decode(context_response_headers(), frame)?;

        Ok(Self {
            activity_id: prefix.activity_id,
            status_code: prefix.status_code,
            client_version: headers
                .get_str(context_response::CLIENT_VERSION)
                .unwrap_or_default()
                .to_string(),
            protocol_version: headers
                .get_u32(context_response::PROTOCOL_VERSION)
                .unwrap_or_default(),
            server_agent: headers
                .get_str(context_response::SERVER_AGENT)
                .unwrap_or_default()
                .to_string(),
            server_version: headers
                .get_str(context_response::SERVER_VERSION)
                .unwrap_or_default()
                .to_string(),
            idle_timeout_secs: headers
                .get_u32(context_response::IDLE_TIMEOUT_IN_SECONDS)
                .unwrap_or_default(),
            unauthenticated_timeout_secs: headers
                .get_u32(context_response::UNAUTHENTICATED_TIMEOUT_IN_SECONDS)
                .unwrap_or_default(),
        })
    }
}

/// Response to an ordinary request.
///
/// Headers are kept by their HTTP name. Names without a wire token, such
/// as `Content-Type` and `Content-Length`, are not sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataResponse {
    pub activity_id: Uuid,
    pub status_code: u32,
    pub headers: BTreeMap<String, String>,
    pub payload: Bytes,
}

impl DataResponse {
    pub fn new(activity_id: Uuid, status_code: u32) -> Self {
        Self {
            activity_id,
            status_code,
            headers: BTreeMap::new(),
            payload: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_payload(mut self, payload: Bytes) -> Self {
        self.payload = payload;
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    fn wire_headers(&self) -> Result<TokenStream, ProtocolError> {
        let mut headers = TokenStream::new(response_headers());
        let present = u8::from(!self.payload.is_empty());
        headers.set(response::PAYLOAD_PRESENT, TokenValue::Byte(present))?;

        for (name, value) in &self.headers {
            match response_header_id(name) {
                Some(id) => headers.set_text(id, value)?,
                None => debug!("response header {} has no wire token, not sent", name),
            }
        }
        Ok(headers)
    }

    pub fn encode(&self, out: &mut BytesMut) -> Result<(), ProtocolError> {
        let headers = self.wire_headers()?;
        let prefix = ResponseStatus::new(self.status_code, self.activity_id, headers.compute_length())?;
        prefix.encode(out);
        headers.encode(out)?;
        if !self.payload.is_empty() {
            frame::encode_payload(&self.payload, out)?;
        }
        Ok(())
    }

    /// Decodes the metadata frame. Returns the response with an empty
    /// payload and whether a payload block follows on the wire.
    pub fn decode_head(mut frame: Bytes) -> Result<(Self, bool), ProtocolError> {
        let whole = frame.clone();
        let prefix = ResponseStatus::decode(&mut frame)?;
        check_frame_length(prefix.length, &whole)?;
        let tokens = TokenStream::decode(response_headers(), frame)?;

        let payload_present = tokens
            .get_u8(response::PAYLOAD_PRESENT)
            .is_some_and(|v| v != 0);

        let headers = tokens
            .tokens()
            .iter()
            .filter_map(|token| {
                let name = response_header_name(token.id())?;
                let value = token.value()?;
                Some((name.to_string(), value.to_string()))
            })
            .collect();

        let response = Self {
            activity_id: prefix.activity_id,
            status_code: prefix.status_code,
            headers,
            payload: Bytes::new(),
        };
        Ok((response, payload_present))
    }
}

/// Any response the server writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Context(ContextResponse),
    Data(DataResponse),
}

impl Response {
    pub fn activity_id(&self) -> Uuid {
        match self {
            Response::Context(context) => context.activity_id,
            Response::Data(data) => data.activity_id,
        }
    }

    pub fn status_code(&self) -> u32 {
        match self {
            Response::Context(context) => context.status_code,
            Response::Data(data) => data.status_code,
        }
    }

    pub fn encode(&self, out: &mut BytesMut) -> Result<(), ProtocolError> {
        match self {
            Response::Context(context) => context.encode(out),
            Response::Data(data) => data.encode(out),
        }
    }
}

impl From<ContextResponse> for Response {
    fn from(context: ContextResponse) -> Self {
        Response::Context(context)
    }
}

impl From<DataResponse> for Response {
    fn from(data: DataResponse) -> Self {
        Response::Data(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameDelimiter;

    fn sample_context() -> ContextResponse {
        ContextResponse {
            activity_id: Uuid::new_v4(),
            status_code: status::OK,
            client_version: String::new(),
            protocol_version: 0,
            server_agent: "RntbdMockServer".to_string(),
            server_version: "1.0".to_string(),
            idle_timeout_secs: 120,
            unauthenticated_timeout_secs: 25,
        }
    }

    #[test]
    fn test_context_response_roundtrip() {
        let context = sample_context();
        let mut out = BytesMut::new();
        context.encode(&mut out).unwrap();

        let frame = FrameDelimiter::default().next_frame(&mut out).unwrap().unwrap();
        let decoded = ContextResponse::decode(frame).unwrap();
        assert_eq!(decoded, context);
    }

    #[test]
    fn test_context_response_serializes() {
        let value = serde_json::to_value(sample_context()).unwrap();
        assert_eq!(value["server_agent"], "RntbdMockServer");
        assert_eq!(value["idle_timeout_secs"], 120);
        assert_eq!(value["client_version"], "");
    }

    #[test]
    fn test_data_response_roundtrip() {
        let response = DataResponse::new(Uuid::new_v4(), status::OK)
            .with_header("Content-Type", "application/json")
            .with_header("x-ms-request-charge", "1.0")
            .with_header("x-ms-transport-request-id", "7")
            .with_payload(Bytes::from_static(b"{}"));

        let mut out = BytesMut::new();
        response.encode(&mut out).unwrap();

        let delimiter = FrameDelimiter::default();
        let frame = delimiter.next_frame(&mut out).unwrap().unwrap();
        let (decoded, payload_present) = DataResponse::decode_head(frame).unwrap();
        assert!(payload_present);
        assert_eq!(decoded.activity_id, response.activity_id);
        assert_eq!(decoded.header("x-ms-request-charge"), Some("1.0"));
        assert_eq!(decoded.header("x-ms-transport-request-id"), Some("7"));
        assert_eq!(decoded.header("content-type"), None);

        let payload = delimiter.next_payload(&mut out).unwrap().unwrap();
        assert_eq!(&payload[..], b"{}");
        assert!(out.is_empty());
    }

    #[test]
    fn test_empty_payload_writes_no_block() {
        let response = DataResponse::new(Uuid::new_v4(), status::INTERNAL_SERVER_ERROR)
            .with_header("x-ms-transport-request-id", "3");
        let mut out = BytesMut::new();
        response.encode(&mut out).unwrap();

        let declared = u32::from_le_bytes([out[0], out[1], out[2], out[3]]) as usize;
        assert_eq!(declared, out.len());

        let frame = FrameDelimiter::default().next_frame(&mut out).unwrap().unwrap();
        let (decoded, payload_present) = DataResponse::decode_head(frame).unwrap();
        assert!(!payload_present);
        assert_eq!(decoded.status_code, 500);
        assert!(!decoded.is_success());
    }

    #[test]
    fn test_invalid_header_value_is_rejected() {
        let response = DataResponse::new(Uuid::new_v4(), status::OK)
            .with_header("x-ms-transport-request-id", "not-a-number");
        let err = response.encode(&mut BytesMut::new()).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidHeaderValue { .. }));
    }

    #[test]
    fn test_response_enum_accessors() {
        let context = sample_context();
        let response = Response::from(context.clone());
        assert_eq!(response.activity_id(), context.activity_id);
        assert_eq!(response.status_code(), 200);

        let data = Response::from(DataResponse::new(context.activity_id, status::NOT_FOUND));
        assert_eq!(data.status_code(), 404);
    }
}
