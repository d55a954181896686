//! Framed TCP echo service.
//!
//! Accepts connections on the configured endpoint (TLS when
//! `[listener.tls]` is set), decodes messages with the configured framer
//! and echoes every message back to its sender.
//!
//! ```text
//!     client ──▶ listener ──▶ [tls handshake] ──▶ connection manager
//!                                                   │  framer.unframe
//!                                                   ▼
//!                                              message arrived
//!                                                   │  handle.send
//!     client ◀──────────────────────────────── framer.frame
//! ```

use std::path::PathBuf;

use bytes::Bytes;
use clap::Parser;

use tcp_service::config::{load_config, FramingKind, ServiceConfig};
use tcp_service::framing::{DelimitedFramer, FramerFactory, LengthPrefixedFramer, MessageFramer};
use tcp_service::lifecycle::signals::wait_for_shutdown_signal;
use tcp_service::observability::{logging, metrics};
use tcp_service::{ServiceError, TcpServiceBuilder};

#[derive(Parser)]
#[command(name = "tcp-service")]
#[command(about = "Framed TCP echo service", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServiceConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability)?;
    tracing::info!("tcp-service v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        tls = config.listener.tls.is_some(),
        max_connections = config.listener.max_connections,
        framing = ?config.framing.kind,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let max_frame_len = config.framing.max_frame_len;
    match config.framing.kind {
        FramingKind::LengthPrefixed => {
            let framers =
                FramerFactory::new(move || LengthPrefixedFramer::with_max_frame_len(max_frame_len));
            run_echo(&config, framers).await?;
        }
        FramingKind::Delimited => {
            let framers =
                FramerFactory::new(move || DelimitedFramer::with_max_frame_len(max_frame_len));
            run_echo(&config, framers).await?;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn run_echo<F>(config: &ServiceConfig, framers: FramerFactory<F>) -> Result<(), ServiceError>
where
    F: MessageFramer<Message = Bytes>,
{
    let service = TcpServiceBuilder::from_config(&config.listener)?
        .framer(framers)
        .on_established(|conn| {
            tracing::debug!(connection_id = %conn.id(), remote = %conn.remote_addr(), "Echo session started");
        })
        .on_message(|conn, message| {
            if let Err(e) = conn.send(message.clone()) {
                tracing::debug!(connection_id = %conn.id(), error = %e, "Echo dropped");
            }
        })
        .on_closed(|conn, reason| {
            tracing::info!(connection_id = %conn.id(), reason = %reason, "Echo session ended");
        })
        .build()?;

    let addr = service.start().await?;
    tracing::info!(address = %addr, mode = %service.security_mode(), "Listening for connections");

    wait_for_shutdown_signal().await;
    service.stop().await;
    tracing::info!(
        active_connections = service.active_connections(),
        "Listener stopped; open connections close on their own"
    );
    Ok(())
}
