//! Framed TCP service library.
//!
//! Accepts plaintext or TLS connections, binds every accepted socket to its
//! own message framer and publishes the connection lifecycle
//! (established, message arrived, closed) to subscribers.

pub mod config;
pub mod error;
pub mod framing;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod service;

pub use config::schema::ServiceConfig;
pub use error::ServiceError;
pub use framing::{FramerFactory, FramingError, MessageFramer};
pub use lifecycle::Shutdown;
pub use net::connection::{ConnectionId, SecurityMode};
pub use net::tls::TlsCredential;
pub use service::{CloseReason, ConnectionHandle, ServiceEvent, TcpService, TcpServiceBuilder};
