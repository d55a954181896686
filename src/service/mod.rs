//! Service layer subsystem.
//!
//! # Data Flow
//! ```text
//! TcpService::start
//!     → Listener accepts socket
//!     → facade.rs builds a plain or TLS TransportConnection
//!     → facade.rs creates a fresh framer + ConnectionManager
//!     → "established" published
//!     → manager.rs receive cycle
//!         → "message arrived" per decoded message
//!         → "closed" once, when the transport ends
//! ```
//!
//! # Design Decisions
//! - Security mode is derived once from the presence of a TLS credential
//! - Subscribers are registered on the builder and never change afterwards
//! - A failure on one connection never reaches the accept loop or other
//!   connections; only bind failures surface from `start`

pub mod events;
pub mod facade;
pub mod handle;
pub mod manager;

pub use events::{CloseReason, EventHandlers, ServiceEvent};
pub use facade::{TcpService, TcpServiceBuilder};
pub use handle::ConnectionHandle;
pub use manager::ConnectionManager;
