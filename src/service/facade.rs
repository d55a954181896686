//! Service facade: listener ownership, security mode and per-connection wiring.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::config::schema::ListenerConfig;
use crate::error::ServiceError;
use crate::framing::{FramerFactory, MessageFramer};
use crate::net::connection::{ConnectionId, ConnectionTracker, SecurityMode, TransportConnection};
use crate::net::listener::{Listener, ListenerError};
use crate::net::tls::TlsCredential;
use crate::observability::metrics;
use crate::service::events::{run_guarded, CloseReason, EventHandlers, ServiceEvent};
use crate::service::handle::ConnectionHandle;
use crate::service::manager::ConnectionManager;

const DEFAULT_MAX_CONNECTIONS: usize = 10_000;
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Accepts TCP (or TLS) connections on one endpoint and publishes their
/// lifecycle to the subscribers registered on the builder.
pub struct TcpService<F: MessageFramer> {
    listener: Listener,
    shared: Arc<Shared<F>>,
}

/// State read by every acceptance; immutable after construction.
struct Shared<F: MessageFramer> {
    security_mode: SecurityMode,
    credential: Option<TlsCredential>,
    framers: FramerFactory<F>,
    handlers: Arc<EventHandlers<F::Message>>,
    tracker: ConnectionTracker,
    handshake_timeout: Duration,
}

impl<F: MessageFramer> TcpService<F> {
    pub fn builder() -> TcpServiceBuilder<F> {
        TcpServiceBuilder::new()
    }

    /// Bind the endpoint and start accepting. Returns the bound address.
    ///
    /// A bind failure is logged and returned; it is never retried.
    pub async fn start(&self) -> Result<SocketAddr, ServiceError> {
        let mode = self.shared.security_mode;
        let shared = Arc::clone(&self.shared);
        let accept = move |remote: SocketAddr, socket: TcpStream| {
            let shared = Arc::clone(&shared);
            async move { shared.on_connection_accepted(remote, socket).await }
        };

        match self.listener.start_listening(accept, &mode.to_string()).await {
            Ok(local_addr) => Ok(local_addr),
            Err(ListenerError::AlreadyListening(addr)) => Err(ServiceError::AlreadyRunning(addr)),
            Err(ListenerError::Bind(source)) => {
                let endpoint = self.listener.endpoint();
                tracing::error!(
                    mode = %mode,
                    address = %endpoint.ip(),
                    port = endpoint.port(),
                    error = %source,
                    "Could not start listening using the {} binding {}:{}",
                    mode,
                    endpoint.ip(),
                    endpoint.port()
                );
                Err(ServiceError::BindFailure {
                    mode,
                    endpoint,
                    source,
                })
            }
        }
    }

    /// Stop accepting new connections. Live connections are not touched.
    pub async fn stop(&self) {
        self.listener.stop().await;
    }

    pub fn security_mode(&self) -> SecurityMode {
        self.shared.security_mode
    }

    /// The configured endpoint.
    pub fn endpoint(&self) -> SocketAddr {
        self.listener.endpoint()
    }

    /// The bound address while running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().await
    }

    pub async fn is_running(&self) -> bool {
        self.listener.local_addr().await.is_some()
    }

    /// Connections accepted and not yet closed.
    pub fn active_connections(&self) -> u64 {
        self.shared.tracker.active_count()
    }
}

impl<F: MessageFramer> Shared<F> {
    /// Runs on the listener's task for this socket, until the connection
    /// closes.
    async fn on_connection_accepted(&self, remote: SocketAddr, socket: TcpStream) {
        let id = ConnectionId::new();
        let transport = match &self.credential {
            Some(credential) => {
                TransportConnection::create_secure_from_socket(
                    id,
                    remote,
                    socket,
                    credential,
                    self.handshake_timeout,
                )
                .await
            }
            None => TransportConnection::create_plain_from_socket(id, remote, socket),
        };

        let transport = match transport {
            Ok(transport) => transport,
            Err(e) => {
                if matches!(e, ServiceError::HandshakeFailure { .. }) {
                    metrics::record_handshake_failure();
                }
                tracing::warn!(
                    mode = %self.security_mode,
                    remote = %remote,
                    connection_id = %id,
                    error = %e,
                    "Discarding connection that could not be established"
                );
                return;
            }
        };

        tracing::info!(
            mode = %self.security_mode,
            remote = %transport.remote_addr(),
            local = %transport.local_addr(),
            connection_id = %id,
            "TCP connection accepted"
        );
        metrics::record_connection_accepted(self.security_mode.label());
        let _guard = self.tracker.track(id);

        let on_message = Arc::clone(&self.handlers);
        let on_closed = Arc::clone(&self.handlers);
        let manager = ConnectionManager::new(
            self.security_mode.label(),
            transport,
            self.framers.create(),
            move |conn: &ConnectionHandle<F::Message>, message: F::Message| {
                on_message.publish_message(conn, &message)
            },
            move |conn: &ConnectionHandle<F::Message>, reason: CloseReason| {
                on_closed.publish_closed(conn, &reason)
            },
        );

        if let Err(e) = run_guarded("established", || {
            self.handlers.publish_established(manager.handle())
        }) {
            tracing::error!(connection_id = %id, error = %e, "Established subscriber failed");
            manager.abort(CloseReason::Fault(Arc::new(e))).await;
            return;
        }

        if let Err(e) = manager.start_receiving().await {
            tracing::error!(connection_id = %id, error = %e, "Connection task failed");
        }
    }
}

/// Builder performing the service's construction checks.
pub struct TcpServiceBuilder<F: MessageFramer> {
    endpoint: Option<SocketAddr>,
    credential: Option<TlsCredential>,
    framers: Option<FramerFactory<F>>,
    max_connections: usize,
    handshake_timeout: Duration,
    handlers: EventHandlers<F::Message>,
}

impl<F: MessageFramer> TcpServiceBuilder<F> {
    pub fn new() -> Self {
        Self {
            endpoint: None,
            credential: None,
            framers: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            handlers: EventHandlers::new(),
        }
    }

    /// Start from a listener configuration, loading the TLS credential when
    /// `tls` is set.
    pub fn from_config(config: &ListenerConfig) -> Result<Self, ServiceError> {
        if config.bind_address.trim().is_empty() {
            return Err(ServiceError::InvalidArgument(
                "listener.bind_address is required".into(),
            ));
        }
        let endpoint = config.bind_address.parse::<SocketAddr>().map_err(|e| {
            ServiceError::InvalidArgument(format!(
                "listener.bind_address `{}`: {}",
                config.bind_address, e
            ))
        })?;

        let mut builder = Self::new()
            .endpoint(endpoint)
            .max_connections(config.max_connections)
            .handshake_timeout(config.handshake_timeout());

        if let Some(tls) = &config.tls {
            let credential =
                TlsCredential::from_pem_files(Path::new(&tls.cert_path), Path::new(&tls.key_path))?;
            builder = builder.tls(credential);
        }

        Ok(builder)
    }

    pub fn endpoint(mut self, endpoint: SocketAddr) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Serve TLS with `credential`; without it the service runs plaintext.
    pub fn tls(mut self, credential: TlsCredential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Factory called once per accepted connection.
    pub fn framer(mut self, framers: FramerFactory<F>) -> Self {
        self.framers = Some(framers);
        self
    }

    pub fn max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn on_established(
        mut self,
        callback: impl Fn(&ConnectionHandle<F::Message>) + Send + Sync + 'static,
    ) -> Self {
        self.handlers.on_established(callback);
        self
    }

    pub fn on_message(
        mut self,
        callback: impl Fn(&ConnectionHandle<F::Message>, &F::Message) + Send + Sync + 'static,
    ) -> Self {
        self.handlers.on_message(callback);
        self
    }

    pub fn on_closed(
        mut self,
        callback: impl Fn(&ConnectionHandle<F::Message>, &CloseReason) + Send + Sync + 'static,
    ) -> Self {
        self.handlers.on_closed(callback);
        self
    }

    pub fn build(self) -> Result<TcpService<F>, ServiceError> {
        let endpoint = self
            .endpoint
            .ok_or_else(|| ServiceError::InvalidArgument("endpoint is required".into()))?;
        let framers = self
            .framers
            .ok_or_else(|| ServiceError::InvalidArgument("framer factory is required".into()))?;
        if self.max_connections == 0 {
            return Err(ServiceError::InvalidArgument(
                "max_connections must be greater than zero".into(),
            ));
        }

        let security_mode = SecurityMode::from_credential(self.credential.as_ref());
        Ok(TcpService {
            listener: Listener::new(endpoint, self.max_connections),
            shared: Arc::new(Shared {
                security_mode,
                credential: self.credential,
                framers,
                handlers: Arc::new(self.handlers),
                tracker: ConnectionTracker::new(),
                handshake_timeout: self.handshake_timeout,
            }),
        })
    }
}

impl<F: MessageFramer + Default> TcpServiceBuilder<F> {
    /// Use `F::default()` for every connection.
    pub fn framer_default(self) -> Self {
        self.framer(FramerFactory::default())
    }
}

impl<F> TcpServiceBuilder<F>
where
    F: MessageFramer,
    F::Message: Clone,
{
    /// Receive every lifecycle event as an owned [`ServiceEvent`].
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ServiceEvent<F::Message>> {
        self.handlers.subscribe()
    }
}

impl<F: MessageFramer> Default for TcpServiceBuilder<F> {
    fn default() -> Self {
        Self::new()
    }
}
