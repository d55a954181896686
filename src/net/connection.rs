//! Transport connections and their identity.
//!
//! # Responsibilities
//! - Generate a unique identity for every accepted socket
//! - Wrap an accepted socket as a plain or TLS transport behind one
//!   read/write contract
//! - Track live connections for the active-connection count

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::net::tls::TlsCredential;
use crate::observability::metrics;

/// Unique identifier assigned to a connection when it is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a new random connection ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.0)
    }
}

/// Whether accepted connections are wrapped in TLS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityMode {
    Normal,
    Secure,
}

impl SecurityMode {
    /// Secure iff a credential is present.
    pub fn from_credential(credential: Option<&TlsCredential>) -> Self {
        match credential {
            Some(_) => Self::Secure,
            None => Self::Normal,
        }
    }

    /// Lowercase label used for connection managers and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Secure => "secure",
        }
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, Self::Secure)
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => f.write_str("Normal"),
            Self::Secure => f.write_str("Secure"),
        }
    }
}

/// Byte stream of an accepted socket, with or without TLS.
pub enum TransportStream {
    Plain(TcpStream),
    Secure(Box<TlsStream<TcpStream>>),
}

impl fmt::Debug for TransportStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("TransportStream::Plain"),
            Self::Secure(_) => f.write_str("TransportStream::Secure"),
        }
    }
}

impl AsyncRead for TransportStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::Secure(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for TransportStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::Secure(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::Secure(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Self::Secure(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// One accepted socket plus its identity and endpoints.
#[derive(Debug)]
pub struct TransportConnection {
    id: ConnectionId,
    security_mode: SecurityMode,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    stream: TransportStream,
}

impl TransportConnection {
    /// Wrap an accepted socket without TLS.
    pub fn create_plain_from_socket(
        id: ConnectionId,
        remote_addr: SocketAddr,
        socket: TcpStream,
    ) -> Result<Self, ServiceError> {
        let local_addr = socket.local_addr()?;
        Ok(Self {
            id,
            security_mode: SecurityMode::Normal,
            local_addr,
            remote_addr,
            stream: TransportStream::Plain(socket),
        })
    }

    /// Run the server side of a TLS handshake on an accepted socket.
    ///
    /// Fails with [`ServiceError::HandshakeFailure`] when negotiation errors
    /// or does not finish within `handshake_timeout`.
    pub async fn create_secure_from_socket(
        id: ConnectionId,
        remote_addr: SocketAddr,
        socket: TcpStream,
        credential: &TlsCredential,
        handshake_timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let local_addr = socket.local_addr()?;
        let handshake = credential.acceptor().accept(socket);

        let stream = match tokio::time::timeout(handshake_timeout, handshake).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(ServiceError::HandshakeFailure {
                    peer: remote_addr,
                    source,
                })
            }
            Err(_) => {
                return Err(ServiceError::HandshakeFailure {
                    peer: remote_addr,
                    source: io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("handshake did not complete within {:?}", handshake_timeout),
                    ),
                })
            }
        };

        Ok(Self {
            id,
            security_mode: SecurityMode::Secure,
            local_addr,
            remote_addr,
            stream: TransportStream::Secure(Box::new(stream)),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn security_mode(&self) -> SecurityMode {
        self.security_mode
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Give up the identity and hand out the byte stream.
    pub fn into_stream(self) -> TransportStream {
        self.stream
    }
}

/// Counts live connections.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new live connection. Returns a guard that decrements on drop.
    pub fn track(&self, id: ConnectionId) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        metrics::increment_active_connections();
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id,
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }
}

/// Keeps a connection counted for as long as it is held.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        metrics::decrement_active_connections();
        tracing::trace!(connection_id = %self.id, "Connection released");
    }
}
