//! Response synthesis for decoded frames.
//!
//! Dispatch is a pure function of the frame's resource and operation
//! types, its activity id and its transport request id. Unknown pairs are
//! answered with a canonical 500 response, never with an error.

use crate::config::ProtocolConfig;
use crate::fixture::DocumentFixture;
use rntbd_protocol::{
    status, ContextResponse, DataResponse, InboundMessage, OperationType, ResourceType, Response,
};
use uuid::Uuid;

pub const CONTENT_TYPE: &str = "Content-Type";
pub const CONTENT_LENGTH: &str = "Content-Length";
pub const REQUEST_CHARGE: &str = "x-ms-request-charge";
pub const TRANSPORT_REQUEST_ID: &str = "x-ms-transport-request-id";

const JSON_CONTENT_TYPE: &str = "application/json";
const CANNED_REQUEST_CHARGE: &str = "1.0";

/// Builds the response for each decoded frame.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    server_agent: String,
    server_version: String,
    idle_timeout_secs: u32,
    unauthenticated_timeout_secs: u32,
    document: DocumentFixture,
}

impl Dispatcher {
    pub fn new(config: &ProtocolConfig, document: DocumentFixture) -> Self {
        Self {
            server_agent: config.server_agent.clone(),
            server_version: config.server_version.clone(),
            idle_timeout_secs: config.idle_timeout_secs,
            unauthenticated_timeout_secs: config.unauthenticated_timeout_secs,
            document,
        }
    }

    pub fn dispatch(&self, message: &InboundMessage) -> Response {
        match message {
            InboundMessage::Context(context) => self.context(context.activity_id).into(),
            InboundMessage::Request(request) => self.respond(
                request.resource_type,
                request.operation_type,
                request.activity_id,
                request.transport_request_id(),
            ),
        }
    }

    /// Selects a response by `(resource_type, operation_type)`.
    pub fn respond(
        &self,
        resource_type: ResourceType,
        operation_type: OperationType,
        activity_id: Uuid,
        transport_request_id: u32,
    ) -> Response {
        match (resource_type, operation_type) {
            (ResourceType::CONNECTION, OperationType::CONNECTION) => {
                self.context(activity_id).into()
            }
            (ResourceType::DOCUMENT, OperationType::READ) => {
                self.read_document(activity_id, transport_request_id).into()
            }
            _ => {
                tracing::debug!(
                    "No handler for {}:{}, answering {}",
                    resource_type,
                    operation_type,
                    status::INTERNAL_SERVER_ERROR
                );
                Self::fallback(activity_id, transport_request_id).into()
            }
        }
    }

    fn context(&self, activity_id: Uuid) -> ContextResponse {
        ContextResponse {
            activity_id,
            status_code: status::OK,
            client_version: String::new(),
            protocol_version: 0,
            server_agent: self.server_agent.clone(),
            server_version: self.server_version.clone(),
            idle_timeout_secs: self.idle_timeout_secs,
            unauthenticated_timeout_secs: self.unauthenticated_timeout_secs,
        }
    }

    fn read_document(&self, activity_id: Uuid, transport_request_id: u32) -> DataResponse {
        DataResponse::new(activity_id, status::OK)
            .with_header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .with_header(REQUEST_CHARGE, CANNED_REQUEST_CHARGE)
            .with_header(CONTENT_LENGTH, self.document.len().to_string())
            .with_header(TRANSPORT_REQUEST_ID, transport_request_id.to_string())
            .with_payload(self.document.body())
    }

    fn fallback(activity_id: Uuid, transport_request_id: u32) -> DataResponse {
        DataResponse::new(activity_id, status::INTERNAL_SERVER_ERROR)
            .with_header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .with_header(REQUEST_CHARGE, CANNED_REQUEST_CHARGE)
            .with_header(TRANSPORT_REQUEST_ID, transport_request_id.to_string())
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(&ProtocolConfig::default(), DocumentFixture::builtin())
    }
}
