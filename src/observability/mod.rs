//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! listener, facade and connection managers produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Connection identity is attached to every per-connection log entry
//! - Metrics are cheap and no-ops until a recorder is installed

pub mod logging;
pub mod metrics;
