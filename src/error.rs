//! Service-level error taxonomy.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::loader::ConfigError;
use crate::net::connection::{ConnectionId, SecurityMode};
use crate::net::tls::TlsError;

/// Errors surfaced by the service facade and its per-connection machinery.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A required construction input was missing or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `start` was called while the service was already listening.
    #[error("service is already listening on {0}")]
    AlreadyRunning(SocketAddr),

    /// The listener could not bind or listen on the endpoint.
    #[error("could not start listening using the {mode} binding {endpoint}: {source}")]
    BindFailure {
        mode: SecurityMode,
        endpoint: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// TLS negotiation with an accepted socket failed or timed out.
    #[error("TLS handshake with {peer} failed: {source}")]
    HandshakeFailure {
        peer: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// I/O error on an accepted or active connection.
    #[error("transport fault: {0}")]
    TransportFault(#[from] std::io::Error),

    /// The connection's receive cycle has ended; nothing more can be sent.
    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionId),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
