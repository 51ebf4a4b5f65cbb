//! High-level client API.

use crate::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;
use bytes::Bytes;
use chrono::Utc;
use rntbd_protocol::registry::request;
use rntbd_protocol::{ContextResponse, DataResponse, OperationType, ResourceType, TokenValue};
use std::sync::Arc;

/// HTTP date format used by the `Date` request header.
const RFC1123_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// High-level client for an RNTBD endpoint.
pub struct Client {
    conn: Arc<Connection>,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            conn: Arc::new(Connection::new(config)),
        }
    }

    /// Connects and negotiates the connection context.
    pub async fn connect(&self) -> Result<ContextResponse, ClientError> {
        self.conn.connect().await
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Returns the context the server answered with.
    pub async fn context(&self) -> Option<ContextResponse> {
        self.conn.context().await
    }

    pub async fn close(&self) -> Result<(), ClientError> {
        self.conn.close().await
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> Arc<Connection> {
        self.conn.clone()
    }

    /// Sends a header-only request. Non-success statuses are returned as
    /// responses, not errors.
    pub async fn request(
        &self,
        resource_type: ResourceType,
        operation_type: OperationType,
    ) -> Result<DataResponse, ClientError> {
        self.conn.request(resource_type, operation_type).await
    }

    /// Reads a document by name and returns its body.
    pub async fn read_document(
        &self,
        database: &str,
        collection: &str,
        document: &str,
    ) -> Result<Bytes, ClientError> {
        let request = self
            .conn
            .new_request(ResourceType::DOCUMENT, OperationType::READ)?
            .with_header(
                request::DATE,
                TokenValue::SmallString(Utc::now().format(RFC1123_FORMAT).to_string()),
            )?
            .with_header(request::DATABASE_NAME, TokenValue::String(database.into()))?
            .with_header(request::COLLECTION_NAME, TokenValue::String(collection.into()))?
            .with_header(request::DOCUMENT_NAME, TokenValue::String(document.into()))?;

        let response = self.conn.send(&request).await?;
        if !response.is_success() {
            return Err(ClientError::ServerStatus {
                status: response.status_code,
                activity_id: response.activity_id,
            });
        }
        Ok(response.payload)
    }

    /// Reads a document and parses its body as JSON.
    pub async fn read_document_json(
        &self,
        database: &str,
        collection: &str,
        document: &str,
    ) -> Result<serde_json::Value, ClientError> {
        let body = self.read_document(database, collection, document).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rntbd_server::fixture::DEFAULT_DOCUMENT;
    use rntbd_server::{Dispatcher, HandshakePolicy, Server, ServerConfig};
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn start_server(config: ServerConfig) -> (Arc<Server>, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(Server::new(config, Dispatcher::default()));
        let runner = server.clone();
        tokio::spawn(async move { runner.serve(listener).await });
        (server, addr)
    }

    #[tokio::test]
    async fn test_connect_negotiates_context() {
        let (server, addr) = start_server(ServerConfig::default()).await;
        let client = Client::new(ConnectionConfig::new(addr));

        let context = client.connect().await.unwrap();
        assert!(client.is_connected());
        assert_eq!(context.status_code, 200);
        assert_eq!(context.server_agent, "RntbdMockServer");
        assert_eq!(context.server_version, "1.0");
        assert_eq!(context.idle_timeout_secs, 120);
        assert_eq!(context.unauthenticated_timeout_secs, 25);
        assert_eq!(context.protocol_version, 0);
        assert_eq!(client.context().await, Some(context));

        client.close().await.unwrap();
        assert!(!client.is_connected());
        server.shutdown();
    }

    #[tokio::test]
    async fn test_read_document() {
        let (server, addr) = start_server(ServerConfig::default()).await;
        let client = Client::new(ConnectionConfig::new(addr));
        client.connect().await.unwrap();

        let body = client.read_document("db", "coll", "1").await.unwrap();
        assert_eq!(&body[..], DEFAULT_DOCUMENT.as_bytes());

        let json = client.read_document_json("db", "coll", "1").await.unwrap();
        assert_eq!(json["included"][0]["attributes"]["name"], "John");
        server.shutdown();
    }

    #[tokio::test]
    async fn test_request_echoes_transport_id() {
        let (server, addr) = start_server(ServerConfig::default()).await;
        let client = Client::new(ConnectionConfig::new(addr));
        client.connect().await.unwrap();

        let first = client
            .request(ResourceType::DOCUMENT, OperationType::READ)
            .await
            .unwrap();
        let second = client
            .request(ResourceType(99), OperationType(99))
            .await
            .unwrap();

        assert_eq!(first.status_code, 200);
        assert_eq!(first.header("x-ms-transport-request-id"), Some("1"));
        assert_eq!(first.header("x-ms-request-charge"), Some("1.0"));
        assert_eq!(second.status_code, 500);
        assert!(second.payload.is_empty());
        assert_eq!(second.header("x-ms-transport-request-id"), Some("2"));
        server.shutdown();
    }

    #[tokio::test]
    async fn test_unknown_read_is_server_status_error() {
        let (server, addr) = start_server(ServerConfig::default()).await;
        let client = Client::new(ConnectionConfig::new(addr));
        client.connect().await.unwrap();

        // The mock only serves document reads; anything else is a 500.
        let conn = client.connection();
        let request = conn
            .new_request(ResourceType::DATABASE, OperationType::READ)
            .unwrap();
        let response = conn.send(&request).await.unwrap();
        assert_eq!(response.status_code, 500);
        assert_eq!(response.activity_id, request.activity_id);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_strict_server_accepts_well_ordered_client() {
        let config = ServerConfig::default().with_handshake(HandshakePolicy::Strict);
        let (server, addr) = start_server(config).await;
        let client = Client::new(ConnectionConfig::new(addr));
        client.connect().await.unwrap();

        let body = client.read_document("db", "coll", "1").await.unwrap();
        assert!(!body.is_empty());
        server.shutdown();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = Client::new(ConnectionConfig::new(addr));
        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, ClientError::Io(_)));
        assert!(err.is_retryable());
    }
}
