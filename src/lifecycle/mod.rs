//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     stop requested → accept loop observes the signal → listener dropped
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → binary stops the service
//! ```
//!
//! # Design Decisions
//! - Stopping a service ends the accept loop only; live connections run
//!   until their transport closes

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
