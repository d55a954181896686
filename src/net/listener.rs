//! TCP listener implementation with backpressure.
//!
//! # Responsibilities
//! - Bind to the service endpoint
//! - Accept incoming TCP connections until stopped
//! - Enforce max_connections limit via semaphore
//! - Hand every accepted socket to the acceptance handler on its own task

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::lifecycle::Shutdown;

/// Pause after a failed accept before trying again (e.g. fd exhaustion).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("failed to bind: {0}")]
    Bind(#[source] std::io::Error),

    /// The listener is already accepting on the given address.
    #[error("already listening on {0}")]
    AlreadyListening(SocketAddr),
}

/// A bounded TCP listener that limits concurrent connections.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// new connections wait in the kernel backlog until a slot becomes available.
#[derive(Debug)]
pub struct Listener {
    endpoint: SocketAddr,
    max_connections: usize,
    running: Mutex<Option<Running>>,
}

#[derive(Debug)]
struct Running {
    local_addr: SocketAddr,
    shutdown: Shutdown,
    accept_task: JoinHandle<()>,
}

impl Listener {
    /// `max_connections` is clamped to `1..=Semaphore::MAX_PERMITS`.
    pub fn new(endpoint: SocketAddr, max_connections: usize) -> Self {
        Self {
            endpoint,
            max_connections: max_connections.clamp(1, Semaphore::MAX_PERMITS),
            running: Mutex::new(None),
        }
    }

    /// Bind the endpoint and start the accept loop.
    ///
    /// `handler` is invoked once per accepted socket, concurrently for
    /// distinct connections. The connection slot is held until the future
    /// it returns completes. `label` tags the listener's log entries.
    pub async fn start_listening<H, Fut>(
        &self,
        handler: H,
        label: &str,
    ) -> Result<SocketAddr, ListenerError>
    where
        H: Fn(SocketAddr, TcpStream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            return Err(ListenerError::AlreadyListening(current.local_addr));
        }

        let listener = TcpListener::bind(self.endpoint)
            .await
            .map_err(ListenerError::Bind)?;
        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(
            mode = label,
            address = %local_addr,
            max_connections = self.max_connections,
            "Listener bound"
        );

        let shutdown = Shutdown::new();
        let accept_task = tokio::spawn(
            accept_loop(
                listener,
                Arc::new(handler),
                Arc::new(Semaphore::new(self.max_connections)),
                shutdown.subscribe(),
                label.to_owned(),
            )
            .in_current_span(),
        );

        *running = Some(Running {
            local_addr,
            shutdown,
            accept_task,
        });
        Ok(local_addr)
    }

    /// Stop accepting and wait for the accept loop to release the socket.
    ///
    /// Connections already handed to the handler are left running.
    pub async fn stop(&self) {
        let running = self.running.lock().await.take();
        if let Some(running) = running {
            running.shutdown.trigger();
            if let Err(e) = running.accept_task.await {
                tracing::warn!(error = %e, "Accept loop ended abnormally");
            }
        }
    }

    /// The configured endpoint.
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// The bound address while listening.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }
}

async fn accept_loop<H, Fut>(
    listener: TcpListener,
    handler: Arc<H>,
    connection_limit: Arc<Semaphore>,
    mut shutdown: broadcast::Receiver<()>,
    label: String,
) where
    H: Fn(SocketAddr, TcpStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        // Acquire permit first (backpressure)
        let permit = tokio::select! {
            _ = shutdown.recv() => break,
            permit = Arc::clone(&connection_limit).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let accepted = tokio::select! {
            _ = shutdown.recv() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((socket, peer_addr)) => {
                tracing::debug!(
                    mode = %label,
                    peer_addr = %peer_addr,
                    available_permits = connection_limit.available_permits(),
                    "Socket accepted"
                );

                let permit = ConnectionPermit { _permit: permit };
                let handler = Arc::clone(&handler);
                tokio::spawn(
                    async move {
                        handler(peer_addr, socket).await;
                        drop(permit);
                    }
                    .in_current_span(),
                );
            }
            Err(e) => {
                tracing::warn!(mode = %label, error = %e, "Failed to accept connection");
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }

    tracing::info!(mode = %label, "Listener stopped");
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool.
#[derive(Debug)]
struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}
