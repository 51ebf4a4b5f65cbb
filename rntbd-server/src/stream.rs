//! Connection stream over plain TCP or TLS.

use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream as ServerTlsStream;

pin_project! {
    /// An accepted connection, encrypted or not.
    #[project = ConnectionStreamProj]
    pub enum ConnectionStream {
        Plain { #[pin] stream: TcpStream },
        Tls { #[pin] stream: ServerTlsStream<TcpStream> },
    }
}

impl ConnectionStream {
    pub fn is_tls(&self) -> bool {
        matches!(self, ConnectionStream::Tls { .. })
    }

    /// Disables Nagle on the underlying socket. Responses are written as
    /// one buffer per request, so there is nothing to coalesce.
    pub fn set_nodelay(&self) -> io::Result<()> {
        match self {
            ConnectionStream::Plain { stream } => stream.set_nodelay(true),
            ConnectionStream::Tls { stream } => stream.get_ref().0.set_nodelay(true),
        }
    }
}

impl AsyncRead for ConnectionStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            ConnectionStreamProj::Plain { stream } => stream.poll_read(cx, buf),
            ConnectionStreamProj::Tls { stream } => stream.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ConnectionStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            ConnectionStreamProj::Plain { stream } => stream.poll_write(cx, buf),
            ConnectionStreamProj::Tls { stream } => stream.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            ConnectionStreamProj::Plain { stream } => stream.poll_flush(cx),
            ConnectionStreamProj::Tls { stream } => stream.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            ConnectionStreamProj::Plain { stream } => stream.poll_shutdown(cx),
            ConnectionStreamProj::Tls { stream } => stream.poll_shutdown(cx),
        }
    }
}
