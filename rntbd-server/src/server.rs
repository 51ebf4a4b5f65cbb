//! TCP server implementation.
//!
//! Each accepted connection runs in its own task and processes frames
//! strictly in arrival order: a response is written before the next frame
//! is decoded. The only state carried between frames is the session's
//! handshake flag.

use crate::config::{Config, HandshakePolicy};
use crate::dispatcher::Dispatcher;
use crate::error::ServerError;
use crate::fixture::DocumentFixture;
use crate::session::Session;
use crate::stream::ConnectionStream;
use rntbd_protocol::{Encoder, InboundMessage, RequestDecoder, MAX_FRAME_SIZE};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Largest accepted frame or payload block.
    pub max_frame_size: u32,
    /// Handling of frames that arrive out of handshake order.
    pub handshake: HandshakePolicy,
    /// TLS acceptor (if TLS is enabled).
    pub tls_acceptor: Option<Arc<TlsAcceptor>>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("max_connections", &self.max_connections)
            .field("max_frame_size", &self.max_frame_size)
            .field("handshake", &self.handshake)
            .field("tls_enabled", &self.tls_acceptor.is_some())
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, rntbd_protocol::DEFAULT_PORT)),
            max_connections: 1000,
            max_frame_size: MAX_FRAME_SIZE,
            handshake: HandshakePolicy::default(),
            tls_acceptor: None,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Sets the TLS acceptor.
    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls_acceptor = Some(Arc::new(acceptor));
        self
    }

    pub fn with_handshake(mut self, handshake: HandshakePolicy) -> Self {
        self.handshake = handshake;
        self
    }

    pub fn with_max_frame_size(mut self, max_frame_size: u32) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Returns whether TLS is enabled.
    pub fn tls_enabled(&self) -> bool {
        self.tls_acceptor.is_some()
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub requests_total: AtomicU64,
    pub errors_total: AtomicU64,
}

/// RNTBD mock server.
pub struct Server {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Server {
    /// Creates a new server.
    pub fn new(config: ServerConfig, dispatcher: Dispatcher) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            dispatcher: Arc::new(dispatcher),
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Builds a server from a loaded configuration, validating it and
    /// loading the fixture and TLS material.
    pub fn from_config(config: &Config) -> Result<Self, ServerError> {
        config.validate()?;

        let document =
            DocumentFixture::from_config(&config.fixture, config.protocol.max_frame_size)?;
        let dispatcher = Dispatcher::new(&config.protocol, document);

        let mut server_config = ServerConfig::new(config.network.bind_addr)
            .with_handshake(config.protocol.handshake)
            .with_max_frame_size(config.protocol.max_frame_size);
        server_config.max_connections = config.network.max_connections;

        if config.tls.enabled {
            server_config = server_config.with_tls(crate::tls::create_tls_acceptor(&config.tls)?);
        }

        Ok(Self::new(server_config, dispatcher))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Binds the configured address and runs the server.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Runs the accept loop on an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let local_addr = listener.local_addr()?;
        self.running.store(true, Ordering::SeqCst);

        let tls_mode = if self.config.tls_enabled() {
            "TLS"
        } else {
            "plain"
        };
        tracing::info!(
            "Server listening on {} ({}, handshake {})",
            local_addr,
            tls_mode,
            self.config.handshake
        );

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((tcp_stream, addr)) => {
                            if self.stats.connections_active.load(Ordering::Relaxed)
                                >= self.config.max_connections as u64
                            {
                                tracing::warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            let tls_acceptor = self.config.tls_acceptor.clone();
                            let dispatcher = self.dispatcher.clone();
                            let stats = self.stats.clone();
                            let config = self.config.clone();
                            let mut conn_shutdown = self.shutdown.subscribe();

                            tokio::spawn(async move {
                                let stream = match Self::maybe_tls_accept(tcp_stream, tls_acceptor.as_deref(), addr).await {
                                    Ok(s) => s,
                                    Err(e) => {
                                        tracing::warn!("[{}] TLS handshake failed: {}", addr, e);
                                        stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                        stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                        return;
                                    }
                                };

                                if let Err(e) = stream.set_nodelay() {
                                    tracing::debug!("[{}] Cannot set TCP_NODELAY: {}", addr, e);
                                }

                                let tls_status = if stream.is_tls() { " (TLS)" } else { "" };
                                tracing::info!("Client connected: {}{}", addr, tls_status);

                                let result = Self::handle_connection(
                                    stream,
                                    addr,
                                    &dispatcher,
                                    &config,
                                    &stats,
                                    &mut conn_shutdown,
                                )
                                .await;

                                match result {
                                    Ok(()) => {}
                                    Err(ServerError::ShuttingDown) => {
                                        tracing::debug!("[{}] Closed for shutdown", addr);
                                    }
                                    Err(e) if e.is_connection_scoped() => {
                                        tracing::warn!("[{}] Connection aborted: {}", addr, e);
                                        stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                    }
                                    Err(e) => {
                                        tracing::error!("[{}] Connection failed: {}", addr, e);
                                        stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                    }
                                }

                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                tracing::info!("Client disconnected: {}", addr);
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Optionally performs TLS handshake on the stream.
    async fn maybe_tls_accept(
        tcp_stream: TcpStream,
        acceptor: Option<&TlsAcceptor>,
        addr: SocketAddr,
    ) -> Result<ConnectionStream, ServerError> {
        match acceptor {
            Some(acceptor) => {
                tracing::debug!("[{}] Performing TLS handshake", addr);
                let tls_stream = acceptor
                    .accept(tcp_stream)
                    .await
                    .map_err(|e| ServerError::TlsHandshake(e.to_string()))?;
                tracing::debug!("[{}] TLS handshake complete", addr);
                Ok(ConnectionStream::Tls { stream: tls_stream })
            }
            None => Ok(ConnectionStream::Plain { stream: tcp_stream }),
        }
    }

    /// Serves one connection and logs its session on the way out.
    async fn handle_connection<S>(
        stream: S,
        addr: SocketAddr,
        dispatcher: &Dispatcher,
        config: &ServerConfig,
        stats: &ServerStats,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut session = Session::new(addr, config.handshake);
        let result =
            Self::run_pipeline(stream, &mut session, dispatcher, config, stats, shutdown).await;
        tracing::debug!("[{}] {}", addr, session.summary());
        result
    }

    /// Runs the delimit, decode, dispatch, encode pipeline for one
    /// connection until the peer closes it or a framing error occurs.
    async fn run_pipeline<S>(
        mut stream: S,
        session: &mut Session,
        dispatcher: &Dispatcher,
        config: &ServerConfig,
        stats: &ServerStats,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let addr = session.remote_addr;
        let mut decoder = RequestDecoder::new(config.max_frame_size);
        let mut buf = [0u8; 8192];

        loop {
            tokio::select! {
                result = stream.read(&mut buf) => {
                    match result {
                        Ok(0) => {
                            if decoder.buffered() > 0 {
                                tracing::debug!(
                                    "[{}] Connection closed with {} bytes of a partial frame",
                                    addr,
                                    decoder.buffered()
                                );
                            } else {
                                tracing::debug!("[{}] Connection closed by client", addr);
                            }
                            return Ok(());
                        }
                        Ok(n) => {
                            tracing::trace!("[{}] Received {} bytes", addr, n);
                            decoder.extend(&buf[..n]);
                        }
                        Err(e) => {
                            tracing::debug!("[{}] Read error: {}", addr, e);
                            return Err(ServerError::Io(e));
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("[{}] Shutdown signal received", addr);
                    return Err(ServerError::ShuttingDown);
                }
            }

            while let Some(message) = decoder.decode_message()? {
                session.admit(&message)?;
                stats.requests_total.fetch_add(1, Ordering::Relaxed);

                let response = dispatcher.dispatch(&message);
                match &message {
                    InboundMessage::Context(context) => tracing::info!(
                        "[{}] Context negotiated (agent={:?}, activity={})",
                        addr,
                        context.user_agent,
                        context.activity_id
                    ),
                    InboundMessage::Request(request) => tracing::debug!(
                        "[{}] {}:{} -> {} (transport={}, activity={})",
                        addr,
                        request.resource_type,
                        request.operation_type,
                        response.status_code(),
                        request.transport_request_id(),
                        request.activity_id
                    ),
                }

                let response_bytes = Encoder::encode_response(&response)?;
                tracing::trace!("[{}] Writing {} bytes", addr, response_bytes.len());
                stream.write_all(&response_bytes).await?;

                if let InboundMessage::Context(context) = &message {
                    session.complete_handshake(context);
                }
            }
        }
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{CONTENT_LENGTH, TRANSPORT_REQUEST_ID};
    use crate::fixture::DEFAULT_DOCUMENT;
    use bytes::BytesMut;
    use rntbd_protocol::registry::request;
    use rntbd_protocol::{
        ContextRequest, ContextResponse, DataResponse, OperationType, Request, ResourceType,
        ResponseDecoder, TokenValue,
    };
    use std::time::Duration;
    use uuid::Uuid;

    async fn start(config: ServerConfig) -> (Arc<Server>, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(Server::new(config, Dispatcher::default()));
        let runner = server.clone();
        tokio::spawn(async move { runner.serve(listener).await });
        (server, addr)
    }

    fn context_bytes(activity_id: Uuid) -> BytesMut {
        Encoder::encode_context_request(&ContextRequest::new(activity_id, "test-client")).unwrap()
    }

    fn request_bytes(rt: u16, ot: u16, activity_id: Uuid, transport_id: u32) -> BytesMut {
        let request = Request::new(ResourceType(rt), OperationType(ot), activity_id)
            .with_header(request::TRANSPORT_REQUEST_ID, TokenValue::ULong(transport_id))
            .unwrap();
        Encoder::encode_request(&request).unwrap()
    }

    async fn read_context(stream: &mut TcpStream, decoder: &mut ResponseDecoder) -> ContextResponse {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(context) = decoder.decode_context().unwrap() {
                return context;
            }
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed before context response");
            decoder.extend(&buf[..n]);
        }
    }

    async fn read_data(stream: &mut TcpStream, decoder: &mut ResponseDecoder) -> DataResponse {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(data) = decoder.decode_data().unwrap() {
                return data;
            }
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed before data response");
            decoder.extend(&buf[..n]);
        }
    }

    async fn assert_closed(stream: &mut TcpStream) {
        let mut buf = [0u8; 64];
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .expect("server kept the connection open")
            .unwrap_or(0);
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_server_not_running_before_serve() {
        let server = Server::new(ServerConfig::default(), Dispatcher::default());
        assert!(!server.is_running());
        assert_eq!(server.config().bind_addr.port(), 8009);
    }

    #[tokio::test]
    async fn test_handshake_then_document_read() {
        let (server, addr) = start(ServerConfig::default()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut decoder = ResponseDecoder::default();

        let activity_id = Uuid::new_v4();
        stream.write_all(&context_bytes(activity_id)).await.unwrap();
        let context = read_context(&mut stream, &mut decoder).await;
        assert_eq!(context.activity_id, activity_id);
        assert_eq!(context.status_code, 200);
        assert_eq!(context.server_agent, "RntbdMockServer");
        assert_eq!(context.idle_timeout_secs, 120);

        let read_id = Uuid::new_v4();
        stream.write_all(&request_bytes(3, 3, read_id, 7)).await.unwrap();
        let data = read_data(&mut stream, &mut decoder).await;
        assert_eq!(data.status_code, 200);
        assert_eq!(data.activity_id, read_id);
        assert_eq!(data.header(TRANSPORT_REQUEST_ID), Some("7"));
        assert_eq!(&data.payload[..], DEFAULT_DOCUMENT.as_bytes());

        assert!(server.is_running());
        assert_eq!(server.stats().requests_total.load(Ordering::Relaxed), 2);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_unknown_operation_keeps_connection_open() {
        let (server, addr) = start(ServerConfig::default()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut decoder = ResponseDecoder::default();

        stream.write_all(&context_bytes(Uuid::new_v4())).await.unwrap();
        read_context(&mut stream, &mut decoder).await;

        // Pipelined frames are answered in order.
        let mut wire = request_bytes(99, 99, Uuid::new_v4(), 1);
        wire.extend_from_slice(&request_bytes(3, 3, Uuid::new_v4(), 2));
        stream.write_all(&wire).await.unwrap();

        let fallback = read_data(&mut stream, &mut decoder).await;
        assert_eq!(fallback.status_code, 500);
        assert!(fallback.payload.is_empty());
        assert_eq!(fallback.header(TRANSPORT_REQUEST_ID), Some("1"));

        let read = read_data(&mut stream, &mut decoder).await;
        assert_eq!(read.status_code, 200);
        assert_eq!(read.header(TRANSPORT_REQUEST_ID), Some("2"));
        server.shutdown();
    }

    #[tokio::test]
    async fn test_oversize_frame_aborts_connection() {
        let config = ServerConfig::default().with_max_frame_size(1024);
        let (server, addr) = start(config).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(&(1025u32).to_le_bytes()).await.unwrap();
        assert_closed(&mut stream).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.stats().errors_total.load(Ordering::Relaxed), 1);
        server.shutdown();
    }

    #[test]
    fn test_from_config_rejects_document_over_frame_limit() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[\"{}\"]", "x".repeat(2048)).unwrap();

        let mut config = Config::default();
        config.protocol.max_frame_size = 1024;
        config.fixture.document_path = Some(file.path().to_path_buf());
        assert!(matches!(
            Server::from_config(&config),
            Err(ServerError::Fixture(_))
        ));

        config.protocol.max_frame_size = 4096;
        let server = Server::from_config(&config).unwrap();
        assert_eq!(server.config().max_frame_size, 4096);
    }

    #[tokio::test]
    async fn test_lenient_dispatches_before_handshake() {
        let (server, addr) = start(ServerConfig::default()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut decoder = ResponseDecoder::default();

        stream.write_all(&request_bytes(3, 3, Uuid::new_v4(), 4)).await.unwrap();
        let data = read_data(&mut stream, &mut decoder).await;
        assert_eq!(data.status_code, 200);

        stream.write_all(&context_bytes(Uuid::new_v4())).await.unwrap();
        let context = read_context(&mut stream, &mut decoder).await;
        assert_eq!(context.status_code, 200);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_strict_closes_on_request_before_handshake() {
        let config = ServerConfig::default().with_handshake(HandshakePolicy::Strict);
        let (server, addr) = start(config).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(&request_bytes(3, 3, Uuid::new_v4(), 1)).await.unwrap();
        assert_closed(&mut stream).await;
        server.shutdown();
    }

    #[tokio::test]
    async fn test_pipeline_over_mock_stream() {
        let dispatcher = Dispatcher::default();
        let context_id = Uuid::new_v4();
        let read_id = Uuid::new_v4();

        let context_reply = Encoder::encode_response(&dispatcher.respond(
            ResourceType::CONNECTION,
            OperationType::CONNECTION,
            context_id,
            0,
        ))
        .unwrap();
        let read_reply = Encoder::encode_response(&dispatcher.respond(
            ResourceType::DOCUMENT,
            OperationType::READ,
            read_id,
            9,
        ))
        .unwrap();

        let mut stream = tokio_test::io::Builder::new()
            .read(&context_bytes(context_id))
            .write(&context_reply)
            .read(&request_bytes(3, 3, read_id, 9))
            .write(&read_reply)
            .build();

        let (_tx, mut rx) = broadcast::channel(1);
        let stats = ServerStats::default();
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 1));
        Server::handle_connection(
            &mut stream,
            addr,
            &dispatcher,
            &ServerConfig::default(),
            &stats,
            &mut rx,
        )
        .await
        .unwrap();

        assert_eq!(stats.requests_total.load(Ordering::Relaxed), 2);
        let length = read_reply.len() - DEFAULT_DOCUMENT.len() - 4;
        let (head, _) = DataResponse::decode_head(read_reply.freeze().slice(..length)).unwrap();
        assert_eq!(
            head.header(CONTENT_LENGTH),
            None,
            "Content-Length has no wire token"
        );
    }

    #[tokio::test]
    async fn test_strict_violation_over_mock_stream() {
        let mut stream = tokio_test::io::Builder::new()
            .read(&request_bytes(1, 3, Uuid::new_v4(), 1))
            .build();

        let (_tx, mut rx) = broadcast::channel(1);
        let config = ServerConfig::default().with_handshake(HandshakePolicy::Strict);
        let result = Server::handle_connection(
            &mut stream,
            SocketAddr::from((Ipv4Addr::LOCALHOST, 1)),
            &Dispatcher::default(),
            &config,
            &ServerStats::default(),
            &mut rx,
        )
        .await;
        assert!(matches!(result, Err(ServerError::HandshakeViolation(_))));
    }
}
