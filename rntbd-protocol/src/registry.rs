//! Header registries.
//!
//! One static table per message kind maps numeric header ids to their
//! descriptors. Tables are built once on first use and never mutated; the
//! declaration order is the order tokens are written on encode.

use crate::token::TokenType;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// Immutable description of one header slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeaderDescriptor {
    pub id: u16,
    pub name: &'static str,
    pub token_type: TokenType,
    /// Checked after decode and logged when absent; never fails a decode.
    pub required: bool,
}

impl HeaderDescriptor {
    pub const fn new(id: u16, name: &'static str, token_type: TokenType, required: bool) -> Self {
        Self {
            id,
            name,
            token_type,
            required,
        }
    }
}

/// Message kinds that carry a token stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    ContextRequest,
    ContextResponse,
    Request,
    Response,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::ContextRequest => "context-request",
            MessageKind::ContextResponse => "context-response",
            MessageKind::Request => "request",
            MessageKind::Response => "response",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lookup table of header descriptors for one message kind.
#[derive(Debug)]
pub struct HeaderRegistry {
    kind: MessageKind,
    headers: &'static [HeaderDescriptor],
    index: HashMap<u16, usize>,
}

impl HeaderRegistry {
    fn new(kind: MessageKind, headers: &'static [HeaderDescriptor]) -> Self {
        let index = headers
            .iter()
            .enumerate()
            .map(|(pos, header)| (header.id, pos))
            .collect::<HashMap<_, _>>();
        debug_assert_eq!(index.len(), headers.len(), "duplicate header id in {kind}");
        Self {
            kind,
            headers,
            index,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Descriptors in encode order.
    pub fn headers(&self) -> &'static [HeaderDescriptor] {
        self.headers
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Position of the header with this id in encode order.
    pub fn position(&self, id: u16) -> Option<usize> {
        self.index.get(&id).copied()
    }

    pub fn get(&self, id: u16) -> Option<&'static HeaderDescriptor> {
        self.position(id).map(|pos| &self.headers[pos])
    }

    pub fn by_name(&self, name: &str) -> Option<&'static HeaderDescriptor> {
        self.headers
            .iter()
            .find(|header| header.name.eq_ignore_ascii_case(name))
    }

    pub fn required(&self) -> impl Iterator<Item = &'static HeaderDescriptor> {
        self.headers.iter().filter(|header| header.required)
    }
}

/// Context (connection negotiation) request header ids.
pub mod context_request {
    pub const PROTOCOL_VERSION: u16 = 0x0000;
    pub const CLIENT_VERSION: u16 = 0x0001;
    pub const USER_AGENT: u16 = 0x0002;
    pub const CALLER_ID: u16 = 0x0003;
    pub const ENABLE_CHANNEL_MULTIPLEXING: u16 = 0x0004;
}

/// Context response header ids.
pub mod context_response {
    pub const PROTOCOL_VERSION: u16 = 0x0000;
    pub const CLIENT_VERSION: u16 = 0x0001;
    pub const SERVER_AGENT: u16 = 0x0002;
    pub const SERVER_VERSION: u16 = 0x0003;
    pub const IDLE_TIMEOUT_IN_SECONDS: u16 = 0x0004;
    pub const UNAUTHENTICATED_TIMEOUT_IN_SECONDS: u16 = 0x0005;
}

/// Request header ids.
pub mod request {
    pub const RESOURCE_ID: u16 = 0x0000;
    pub const AUTHORIZATION_TOKEN: u16 = 0x0001;
    pub const PAYLOAD_PRESENT: u16 = 0x0002;
    pub const DATE: u16 = 0x0003;
    pub const PAGE_SIZE: u16 = 0x0004;
    pub const SESSION_TOKEN: u16 = 0x0005;
    pub const CONTINUATION_TOKEN: u16 = 0x0006;
    pub const INDEXING_DIRECTIVE: u16 = 0x0007;
    pub const MATCH: u16 = 0x0008;
    pub const CONSISTENCY_LEVEL: u16 = 0x0010;
    pub const ENTITY_ID: u16 = 0x0011;
    pub const RESOURCE_SCHEMA_NAME: u16 = 0x0012;
    pub const REPLICA_PATH: u16 = 0x0013;
    pub const RESOURCE_TOKEN_EXPIRY: u16 = 0x0014;
    pub const DATABASE_NAME: u16 = 0x0015;
    pub const COLLECTION_NAME: u16 = 0x0016;
    pub const DOCUMENT_NAME: u16 = 0x0017;
    pub const CLIENT_VERSION: u16 = 0x0028;
    pub const CAN_CHARGE: u16 = 0x0029;
    pub const CAN_THROTTLE: u16 = 0x002A;
    pub const PARTITION_KEY: u16 = 0x002B;
    pub const PARTITION_KEY_RANGE_ID: u16 = 0x002C;
    pub const COLLECTION_RID: u16 = 0x0035;
    pub const REMAINING_TIME_IN_MS_ON_CLIENT_REQUEST: u16 = 0x0049;
    pub const CLIENT_RETRY_ATTEMPT_COUNT: u16 = 0x004A;
    pub const TRANSPORT_REQUEST_ID: u16 = 0x004D;
}

/// Response header ids.
pub mod response {
    pub const PAYLOAD_PRESENT: u16 = 0x0000;
    pub const LAST_STATE_CHANGE_DATE_TIME: u16 = 0x0002;
    pub const CONTINUATION_TOKEN: u16 = 0x0003;
    pub const ETAG: u16 = 0x0004;
    pub const RETRY_AFTER_MILLISECONDS: u16 = 0x000C;
    pub const SCHEMA_VERSION: u16 = 0x0010;
    pub const LSN: u16 = 0x0013;
    pub const ITEM_COUNT: u16 = 0x0014;
    pub const REQUEST_CHARGE: u16 = 0x0015;
    pub const OWNER_FULL_NAME: u16 = 0x0017;
    pub const OWNER_ID: u16 = 0x0018;
    pub const SUB_STATUS: u16 = 0x001C;
    pub const PARTITION_KEY_RANGE_ID: u16 = 0x0021;
    pub const GLOBAL_COMMITTED_LSN: u16 = 0x0029;
    pub const ITEM_LSN: u16 = 0x0032;
    pub const TRANSPORT_REQUEST_ID: u16 = 0x0035;
    pub const SERVER_DATE_TIME_UTC: u16 = 0x0039;
    pub const LOCAL_LSN: u16 = 0x003A;
    pub const SESSION_TOKEN: u16 = 0x003E;
}

const CONTEXT_REQUEST_HEADERS: &[HeaderDescriptor] = &[
    HeaderDescriptor::new(
        context_request::PROTOCOL_VERSION,
        "ProtocolVersion",
        TokenType::ULong,
        true,
    ),
    HeaderDescriptor::new(
        context_request::CLIENT_VERSION,
        "ClientVersion",
        TokenType::SmallString,
        true,
    ),
    HeaderDescriptor::new(
        context_request::USER_AGENT,
        "UserAgent",
        TokenType::SmallString,
        true,
    ),
    HeaderDescriptor::new(context_request::CALLER_ID, "CallerId", TokenType::Byte, false),
    HeaderDescriptor::new(
        context_request::ENABLE_CHANNEL_MULTIPLEXING,
        "EnableChannelMultiplexing",
        TokenType::Byte,
        false,
    ),
];

const CONTEXT_RESPONSE_HEADERS: &[HeaderDescriptor] = &[
    HeaderDescriptor::new(
        context_response::PROTOCOL_VERSION,
        "ProtocolVersion",
        TokenType::ULong,
        false,
    ),
    HeaderDescriptor::new(
        context_response::CLIENT_VERSION,
        "ClientVersion",
        TokenType::SmallString,
        false,
    ),
    HeaderDescriptor::new(
        context_response::SERVER_AGENT,
        "ServerAgent",
        TokenType::SmallString,
        true,
    ),
    HeaderDescriptor::new(
        context_response::SERVER_VERSION,
        "ServerVersion",
        TokenType::SmallString,
        true,
    ),
    HeaderDescriptor::new(
        context_response::IDLE_TIMEOUT_IN_SECONDS,
        "IdleTimeoutInSeconds",
        TokenType::ULong,
        false,
    ),
    HeaderDescriptor::new(
        context_response::UNAUTHENTICATED_TIMEOUT_IN_SECONDS,
        "UnauthenticatedTimeoutInSeconds",
        TokenType::ULong,
        false,
    ),
];

const REQUEST_HEADERS: &[HeaderDescriptor] = &[
    HeaderDescriptor::new(request::RESOURCE_ID, "ResourceId", TokenType::Bytes, false),
    HeaderDescriptor::new(
        request::AUTHORIZATION_TOKEN,
        "AuthorizationToken",
        TokenType::String,
        false,
    ),
    HeaderDescriptor::new(
        request::PAYLOAD_PRESENT,
        "PayloadPresent",
        TokenType::Byte,
        true,
    ),
    HeaderDescriptor::new(request::DATE, "Date", TokenType::SmallString, false),
    HeaderDescriptor::new(request::PAGE_SIZE, "PageSize", TokenType::ULong, false),
    HeaderDescriptor::new(
        request::SESSION_TOKEN,
        "SessionToken",
        TokenType::String,
        false,
    ),
    HeaderDescriptor::new(
        request::CONTINUATION_TOKEN,
        "ContinuationToken",
        TokenType::String,
        false,
    ),
    HeaderDescriptor::new(
        request::INDEXING_DIRECTIVE,
        "IndexingDirective",
        TokenType::Byte,
        false,
    ),
    HeaderDescriptor::new(request::MATCH, "Match", TokenType::String, false),
    HeaderDescriptor::new(
        request::CONSISTENCY_LEVEL,
        "ConsistencyLevel",
        TokenType::Byte,
        false,
    ),
    HeaderDescriptor::new(request::ENTITY_ID, "EntityId", TokenType::String, false),
    HeaderDescriptor::new(
        request::RESOURCE_SCHEMA_NAME,
        "ResourceSchemaName",
        TokenType::SmallString,
        false,
    ),
    HeaderDescriptor::new(
        request::REPLICA_PATH,
        "ReplicaPath",
        TokenType::String,
        true,
    ),
    HeaderDescriptor::new(
        request::RESOURCE_TOKEN_EXPIRY,
        "ResourceTokenExpiry",
        TokenType::ULong,
        false,
    ),
    HeaderDescriptor::new(
        request::DATABASE_NAME,
        "DatabaseName",
        TokenType::String,
        false,
    ),
    HeaderDescriptor::new(
        request::COLLECTION_NAME,
        "CollectionName",
        TokenType::String,
        false,
    ),
    HeaderDescriptor::new(
        request::DOCUMENT_NAME,
        "DocumentName",
        TokenType::String,
        false,
    ),
    HeaderDescriptor::new(
        request::CLIENT_VERSION,
        "ClientVersion",
        TokenType::SmallString,
        false,
    ),
    HeaderDescriptor::new(request::CAN_CHARGE, "CanCharge", TokenType::Byte, false),
    HeaderDescriptor::new(request::CAN_THROTTLE, "CanThrottle", TokenType::Byte, false),
    HeaderDescriptor::new(
        request::PARTITION_KEY,
        "PartitionKey",
        TokenType::String,
        false,
    ),
    HeaderDescriptor::new(
        request::PARTITION_KEY_RANGE_ID,
        "PartitionKeyRangeId",
        TokenType::String,
        false,
    ),
    HeaderDescriptor::new(
        request::COLLECTION_RID,
        "CollectionRid",
        TokenType::String,
        false,
    ),
    HeaderDescriptor::new(
        request::REMAINING_TIME_IN_MS_ON_CLIENT_REQUEST,
        "RemainingTimeInMsOnClientRequest",
        TokenType::ULong,
        false,
    ),
    HeaderDescriptor::new(
        request::CLIENT_RETRY_ATTEMPT_COUNT,
        "ClientRetryAttemptCount",
        TokenType::ULong,
        false,
    ),
    HeaderDescriptor::new(
        request::TRANSPORT_REQUEST_ID,
        "TransportRequestID",
        TokenType::ULong,
        true,
    ),
];

const RESPONSE_HEADERS: &[HeaderDescriptor] = &[
    HeaderDescriptor::new(
        response::PAYLOAD_PRESENT,
        "PayloadPresent",
        TokenType::Byte,
        true,
    ),
    HeaderDescriptor::new(
        response::LAST_STATE_CHANGE_DATE_TIME,
        "LastStateChangeDateTime",
        TokenType::SmallString,
        false,
    ),
    HeaderDescriptor::new(
        response::CONTINUATION_TOKEN,
        "ContinuationToken",
        TokenType::String,
        false,
    ),
    HeaderDescriptor::new(response::ETAG, "ETag", TokenType::String, false),
    HeaderDescriptor::new(
        response::RETRY_AFTER_MILLISECONDS,
        "RetryAfterMilliseconds",
        TokenType::ULong,
        false,
    ),
    HeaderDescriptor::new(
        response::SCHEMA_VERSION,
        "SchemaVersion",
        TokenType::SmallString,
        false,
    ),
    HeaderDescriptor::new(response::LSN, "LSN", TokenType::LongLong, false),
    HeaderDescriptor::new(response::ITEM_COUNT, "ItemCount", TokenType::ULong, false),
    HeaderDescriptor::new(
        response::REQUEST_CHARGE,
        "RequestCharge",
        TokenType::Double,
        false,
    ),
    HeaderDescriptor::new(
        response::OWNER_FULL_NAME,
        "OwnerFullName",
        TokenType::String,
        false,
    ),
    HeaderDescriptor::new(response::OWNER_ID, "OwnerId", TokenType::String, false),
    HeaderDescriptor::new(response::SUB_STATUS, "SubStatus", TokenType::ULong, false),
    HeaderDescriptor::new(
        response::PARTITION_KEY_RANGE_ID,
        "PartitionKeyRangeId",
        TokenType::String,
        false,
    ),
    HeaderDescriptor::new(
        response::GLOBAL_COMMITTED_LSN,
        "GlobalCommittedLSN",
        TokenType::LongLong,
        false,
    ),
    HeaderDescriptor::new(response::ITEM_LSN, "ItemLSN", TokenType::LongLong, false),
    HeaderDescriptor::new(
        response::TRANSPORT_REQUEST_ID,
        "TransportRequestID",
        TokenType::ULong,
        false,
    ),
    HeaderDescriptor::new(
        response::SERVER_DATE_TIME_UTC,
        "ServerDateTimeUtc",
        TokenType::SmallString,
        false,
    ),
    HeaderDescriptor::new(response::LOCAL_LSN, "LocalLSN", TokenType::LongLong, false),
    HeaderDescriptor::new(
        response::SESSION_TOKEN,
        "SessionToken",
        TokenType::String,
        false,
    ),
];

/// Response header names carried on the wire, keyed by their HTTP name.
///
/// `Content-Type` and `Content-Length` are deliberately absent: they only
/// live on the in-memory response.
const RESPONSE_HEADER_NAMES: &[(&str, u16)] = &[
    ("x-ms-request-charge", response::REQUEST_CHARGE),
    ("x-ms-transport-request-id", response::TRANSPORT_REQUEST_ID),
    ("x-ms-session-token", response::SESSION_TOKEN),
    ("etag", response::ETAG),
    ("x-ms-substatus", response::SUB_STATUS),
    ("x-ms-item-count", response::ITEM_COUNT),
    ("x-ms-continuation", response::CONTINUATION_TOKEN),
    ("x-ms-retry-after-ms", response::RETRY_AFTER_MILLISECONDS),
    ("x-ms-lsn", response::LSN),
    ("x-ms-global-committed-lsn", response::GLOBAL_COMMITTED_LSN),
    ("x-ms-documentdb-partitionkeyrangeid", response::PARTITION_KEY_RANGE_ID),
];

/// Maps an HTTP-style response header name to its wire token id.
pub fn response_header_id(name: &str) -> Option<u16> {
    RESPONSE_HEADER_NAMES
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(name))
        .map(|(_, id)| *id)
}

/// Maps a response token id back to its HTTP-style header name.
pub fn response_header_name(id: u16) -> Option<&'static str> {
    RESPONSE_HEADER_NAMES
        .iter()
        .find(|(_, known)| *known == id)
        .map(|(name, _)| *name)
}

pub fn context_request_headers() -> &'static HeaderRegistry {
    static REGISTRY: OnceLock<HeaderRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| HeaderRegistry::new(MessageKind::ContextRequest, CONTEXT_REQUEST_HEADERS))
}

pub fn context_response_headers() -> &'static HeaderRegistry {
    static REGISTRY: OnceLock<HeaderRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        HeaderRegistry::new(MessageKind::ContextResponse, CONTEXT_RESPONSE_HEADERS)
    })
}

pub fn request_headers() -> &'static HeaderRegistry {
    static REGISTRY: OnceLock<HeaderRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| HeaderRegistry::new(MessageKind::Request, REQUEST_HEADERS))
}

pub fn response_headers() -> &'static HeaderRegistry {
    static REGISTRY: OnceLock<HeaderRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| HeaderRegistry::new(MessageKind::Response, RESPONSE_HEADERS))
}

/// Registry for a message kind.
pub fn registry_for(kind: MessageKind) -> &'static HeaderRegistry {
    match kind {
        MessageKind::ContextRequest => context_request_headers(),
        MessageKind::ContextResponse => context_response_headers(),
        MessageKind::Request => request_headers(),
        MessageKind::Response => response_headers(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const ALL_KINDS: [MessageKind; 4] = [
        MessageKind::ContextRequest,
        MessageKind::ContextResponse,
        MessageKind::Request,
        MessageKind::Response,
    ];

    #[test]
    fn test_ids_unique_per_registry() {
        for kind in ALL_KINDS {
            let registry = registry_for(kind);
            let ids: HashSet<u16> = registry.headers().iter().map(|h| h.id).collect();
            assert_eq!(ids.len(), registry.len(), "{kind}");
            assert_eq!(registry.kind(), kind);
        }
    }

    #[test]
    fn test_lookup_by_id_and_name() {
        let registry = request_headers();
        let header = registry.get(request::TRANSPORT_REQUEST_ID).unwrap();
        assert_eq!(header.name, "TransportRequestID");
        assert_eq!(header.token_type, TokenType::ULong);
        assert!(header.required);

        assert_eq!(
            registry.by_name("payloadpresent").map(|h| h.id),
            Some(request::PAYLOAD_PRESENT)
        );
        assert!(registry.get(0x7FFF).is_none());
    }

    #[test]
    fn test_position_follows_declaration_order() {
        let registry = context_response_headers();
        for (pos, header) in registry.headers().iter().enumerate() {
            assert_eq!(registry.position(header.id), Some(pos));
        }
    }

    #[test]
    fn test_context_request_required_set() {
        let required: Vec<&str> = context_request_headers()
            .required()
            .map(|h| h.name)
            .collect();
        assert_eq!(required, ["ProtocolVersion", "ClientVersion", "UserAgent"]);
    }

    #[test]
    fn test_response_header_name_mapping() {
        assert_eq!(
            response_header_id("x-ms-request-charge"),
            Some(response::REQUEST_CHARGE)
        );
        assert_eq!(response_header_id("ETag"), Some(response::ETAG));
        assert_eq!(response_header_id("Content-Type"), None);
        assert_eq!(response_header_id("Content-Length"), None);
        assert_eq!(
            response_header_name(response::TRANSPORT_REQUEST_ID),
            Some("x-ms-transport-request-id")
        );

        // Every mapped id exists in the response registry.
        for (name, id) in RESPONSE_HEADER_NAMES {
            assert!(response_headers().get(*id).is_some(), "{name}");
        }
    }
}
