//! Connection handle passed to event subscribers.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::ServiceError;
use crate::net::connection::{ConnectionId, SecurityMode};

/// Requests from handles to the connection's receive cycle.
#[derive(Debug)]
pub(crate) enum Command<M> {
    Send(M),
    Close,
}

/// Cheap, clonable reference to one managed connection.
///
/// Handles compare equal when they refer to the same connection.
pub struct ConnectionHandle<M> {
    inner: Arc<Inner<M>>,
}

struct Inner<M> {
    id: ConnectionId,
    security_mode: SecurityMode,
    label: String,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    commands: mpsc::UnboundedSender<Command<M>>,
}

impl<M> ConnectionHandle<M> {
    pub(crate) fn new(
        id: ConnectionId,
        security_mode: SecurityMode,
        label: String,
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
        commands: mpsc::UnboundedSender<Command<M>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id,
                security_mode,
                label,
                local_addr,
                remote_addr,
                commands,
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn security_mode(&self) -> SecurityMode {
        self.inner.security_mode
    }

    /// Label given to the connection manager ("normal" or "secure").
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.remote_addr
    }

    /// Queue `message` for framing and sending on this connection.
    ///
    /// Messages are written in the order they are queued. Fails once the
    /// connection has closed.
    pub fn send(&self, message: M) -> Result<(), ServiceError> {
        self.inner
            .commands
            .send(Command::Send(message))
            .map_err(|_| ServiceError::ConnectionClosed(self.inner.id))
    }

    /// Ask the connection to shut down. Messages queued earlier are sent
    /// first. The `closed` event carries [`CloseReason::LocalClosed`].
    ///
    /// [`CloseReason::LocalClosed`]: crate::service::CloseReason::LocalClosed
    pub fn close(&self) {
        let _ = self.inner.commands.send(Command::Close);
    }

    /// True once the receive cycle has ended.
    pub fn is_closed(&self) -> bool {
        self.inner.commands.is_closed()
    }
}

impl<M> Clone for ConnectionHandle<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M> PartialEq for ConnectionHandle<M> {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl<M> Eq for ConnectionHandle<M> {}

impl<M> fmt::Debug for ConnectionHandle<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("mode", &self.inner.security_mode)
            .field("local_addr", &self.inner.local_addr)
            .field("remote_addr", &self.inner.remote_addr)
            .finish()
    }
}
