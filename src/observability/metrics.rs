//! Metrics collection and exposition.
//!
//! # Metrics
//! - `tcp_service_connections_accepted_total` (counter): by security mode
//! - `tcp_service_handshake_failures_total` (counter)
//! - `tcp_service_active_connections` (gauge): current connection count
//! - `tcp_service_messages_received_total` (counter): by security mode
//! - `tcp_service_connections_closed_total` (counter): by close reason

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and serve it on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_connection_accepted(mode: &'static str) {
    ::metrics::counter!("tcp_service_connections_accepted_total", "mode" => mode).increment(1);
}

pub fn record_handshake_failure() {
    ::metrics::counter!("tcp_service_handshake_failures_total").increment(1);
}

pub fn increment_active_connections() {
    ::metrics::gauge!("tcp_service_active_connections").increment(1.0);
}

pub fn decrement_active_connections() {
    ::metrics::gauge!("tcp_service_active_connections").decrement(1.0);
}

pub fn record_messages_received(mode: &'static str, count: usize) {
    ::metrics::counter!("tcp_service_messages_received_total", "mode" => mode)
        .increment(count as u64);
}

pub fn record_connection_closed(reason: &'static str) {
    ::metrics::counter!("tcp_service_connections_closed_total", "reason" => reason).increment(1);
}
