//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → tls.rs (optional TLS handshake)
//!     → connection.rs (identity, plain/secure transport)
//!     → Hand off to the service layer
//! ```
//!
//! # Design Decisions
//! - Bounded accept loop prevents resource exhaustion
//! - Plain and TLS transports share one read/write contract
//! - TLS is chosen once per service, never per connection

pub mod connection;
pub mod listener;
pub mod tls;
