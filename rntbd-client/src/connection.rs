//! Connection management.
//!
//! RNTBD correlates responses by activity id only, so a connection runs
//! one exchange at a time: the request is written and its response read
//! while holding the transport lock.

use crate::error::ClientError;
use crate::stream::ClientStream;
use crate::tls::create_tls_connector;
use rntbd_protocol::registry::request;
use rntbd_protocol::{
    status, ContextRequest, ContextResponse, DataResponse, Encoder, OperationType, ProtocolError,
    Request, ResourceType, ResponseDecoder, TokenValue, MAX_FRAME_SIZE,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// User agent sent in the context request unless overridden.
pub const DEFAULT_USER_AGENT: &str = concat!("rntbd-client/", env!("CARGO_PKG_VERSION"));

/// TLS configuration for client connections.
#[derive(Debug, Clone, Default)]
pub struct TlsClientConfig {
    /// Enable TLS for the connection.
    pub enabled: bool,
    /// Path to PEM-encoded CA certificate(s) for server verification.
    /// If None, the webpki roots are used.
    pub ca_cert_path: Option<PathBuf>,
    /// Path to PEM-encoded client certificate (for mTLS).
    pub client_cert_path: Option<PathBuf>,
    /// Path to PEM-encoded client private key (for mTLS).
    pub client_key_path: Option<PathBuf>,
    /// Skip server certificate verification.
    pub insecure: bool,
    /// Server name for SNI (defaults to the address' IP).
    pub server_name: Option<String>,
}

impl TlsClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self.enabled = true;
        self
    }

    pub fn with_client_cert(
        mut self,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        self.client_cert_path = Some(cert_path.into());
        self.client_key_path = Some(key_path.into());
        self.enabled = true;
        self
    }

    pub fn with_insecure(mut self) -> Self {
        self.insecure = true;
        self.enabled = true;
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server address.
    pub addr: SocketAddr,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Time allowed for one request/response exchange.
    pub request_timeout: Duration,
    /// User agent for the context request.
    pub user_agent: String,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
    /// Largest accepted response frame or payload.
    pub max_frame_size: u32,
    /// Replica path sent with every request.
    pub replica_path: String,
    /// TLS configuration (optional).
    pub tls: Option<TlsClientConfig>,
}

impl ConnectionConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_frame_size: MAX_FRAME_SIZE,
            replica_path: "/".to_string(),
            tls: None,
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_replica_path(mut self, path: impl Into<String>) -> Self {
        self.replica_path = path.into();
        self
    }

    pub fn with_tls(mut self, tls_config: TlsClientConfig) -> Self {
        self.tls = Some(tls_config);
        self
    }
}

/// Transport and its response decoder, locked together per exchange.
struct Transport {
    stream: ClientStream,
    decoder: ResponseDecoder,
}

/// A connection to an RNTBD server.
pub struct Connection {
    config: ConnectionConfig,
    transport: Mutex<Option<Transport>>,
    context: Mutex<Option<ContextResponse>>,
    next_transport_id: AtomicU32,
    connected: AtomicBool,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            transport: Mutex::new(None),
            context: Mutex::new(None),
            next_transport_id: AtomicU32::new(1),
            connected: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Connects to the server and negotiates the connection context.
    pub async fn connect(&self) -> Result<ContextResponse, ClientError> {
        tracing::debug!("Connecting to {}...", self.config.addr);

        let tcp_stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(self.config.addr),
        )
        .await
        .map_err(|_| ClientError::Timeout)??;

        tcp_stream.set_nodelay(true).ok();

        let stream = match &self.config.tls {
            Some(tls_config) if tls_config.enabled => {
                let host = self.config.addr.ip().to_string();
                let (connector, server_name) = create_tls_connector(tls_config, &host)?;

                tracing::debug!("Performing TLS handshake...");
                let tls_stream = connector
                    .connect(server_name, tcp_stream)
                    .await
                    .map_err(|e| ClientError::TlsHandshake(e.to_string()))?;
                ClientStream::Tls { stream: tls_stream }
            }
            _ => ClientStream::Plain { stream: tcp_stream },
        };

        if let Ok(local) = stream.local_addr() {
            tracing::debug!(
                "Connected {} -> {}{}",
                local,
                self.config.addr,
                if stream.is_tls() { " (TLS)" } else { "" }
            );
        }

        *self.transport.lock().await = Some(Transport {
            stream,
            decoder: ResponseDecoder::new(self.config.max_frame_size),
        });

        let context = self.negotiate().await?;
        *self.context.lock().await = Some(context.clone());
        self.connected.store(true, Ordering::SeqCst);
        Ok(context)
    }

    /// Sends the context request and waits for the context response.
    async fn negotiate(&self) -> Result<ContextResponse, ClientError> {
        let context_request = ContextRequest::new(Uuid::new_v4(), self.config.user_agent.clone());
        let encoded = Encoder::encode_context_request(&context_request)?;

        let context = self
            .exchange(&encoded, |decoder| decoder.decode_context())
            .await?;
        check_activity(context_request.activity_id, context.activity_id)?;

        if context.status_code != status::OK {
            return Err(ClientError::ServerStatus {
                status: context.status_code,
                activity_id: context.activity_id,
            });
        }

        tracing::debug!(
            "Context negotiated with {} {} (idle timeout {}s)",
            context.server_agent,
            context.server_version,
            context.idle_timeout_secs
        );
        Ok(context)
    }

    /// Writes one encoded frame and reads until `decode` yields a message.
    async fn exchange<T, F>(&self, encoded: &[u8], mut decode: F) -> Result<T, ClientError>
    where
        F: FnMut(&mut ResponseDecoder) -> Result<Option<T>, ProtocolError>,
    {
        let mut guard = self.transport.lock().await;
        let transport = guard.as_mut().ok_or(ClientError::NotConnected)?;
        let buffer_size = self.config.read_buffer_size;

        tokio::time::timeout(self.config.request_timeout, async {
            transport.stream.write_all(encoded).await?;

            let mut buf = vec![0u8; buffer_size];
            loop {
                if let Some(message) = decode(&mut transport.decoder)? {
                    return Ok(message);
                }

                let n = transport.stream.read(&mut buf).await?;
                if n == 0 {
                    return Err(ClientError::ConnectionClosed);
                }
                transport.decoder.extend(&buf[..n]);
            }
        })
        .await
        .map_err(|_| ClientError::Timeout)?
    }

    /// Allocates the next transport request id.
    pub fn next_transport_id(&self) -> u32 {
        self.next_transport_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Builds a request with a fresh activity id, the next transport
    /// request id, `PayloadPresent` cleared and the configured replica path.
    pub fn new_request(
        &self,
        resource_type: ResourceType,
        operation_type: OperationType,
    ) -> Result<Request, ClientError> {
        let request = Request::new(resource_type, operation_type, Uuid::new_v4())
            .with_header(
                request::REPLICA_PATH,
                TokenValue::String(self.config.replica_path.clone()),
            )?
            .with_header(
                request::TRANSPORT_REQUEST_ID,
                TokenValue::ULong(self.next_transport_id()),
            )?;
        Ok(request)
    }

    /// Sends a request and returns the response, whatever its status.
    pub async fn send(&self, request: &Request) -> Result<DataResponse, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let encoded = Encoder::encode_request(request)?;
        tracing::debug!(
            "Sending {}:{} (transport={}, {} bytes)",
            request.resource_type,
            request.operation_type,
            request.transport_request_id(),
            encoded.len()
        );

        let response = match self.exchange(&encoded, |decoder| decoder.decode_data()).await {
            Ok(response) => response,
            Err(e) => {
                // A partially read exchange leaves the stream unusable.
                if matches!(e, ClientError::Timeout | ClientError::ConnectionClosed) {
                    self.connected.store(false, Ordering::SeqCst);
                }
                return Err(e);
            }
        };
        check_activity(request.activity_id, response.activity_id)?;

        tracing::debug!(
            "Response {} (transport={})",
            response.status_code,
            request.transport_request_id()
        );
        Ok(response)
    }

    /// Sends a header-only request for `(resource_type, operation_type)`.
    pub async fn request(
        &self,
        resource_type: ResourceType,
        operation_type: OperationType,
    ) -> Result<DataResponse, ClientError> {
        let request = self.new_request(resource_type, operation_type)?;
        self.send(&request).await
    }

    /// Returns the negotiated context, if connected.
    pub async fn context(&self) -> Option<ContextResponse> {
        self.context.lock().await.clone()
    }

    /// Returns whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Closes the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.connected.store(false, Ordering::SeqCst);
        *self.context.lock().await = None;

        if let Some(mut transport) = self.transport.lock().await.take() {
            tracing::debug!("Shutting down connection to {}", self.config.addr);
            let _ = transport.stream.shutdown().await;
        }
        Ok(())
    }
}

fn check_activity(sent: Uuid, received: Uuid) -> Result<(), ClientError> {
    if sent != received {
        return Err(ProtocolError::UnexpectedMessage(format!(
            "response for activity {} while waiting for {}",
            received, sent
        ))
        .into());
    }
    Ok(())
}
