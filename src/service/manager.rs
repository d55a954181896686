//! Per-connection receive-and-frame cycle.
//!
//! # Responsibilities
//! - Own one transport connection and one framer instance
//! - Feed every chunk read from the transport to the framer and report each
//!   decoded message, in decode order
//! - Frame and write messages queued through the connection's handle
//! - Report closure exactly once, whatever ended the connection

use std::io;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::framing::MessageFramer;
use crate::net::connection::TransportConnection;
use crate::observability::metrics;
use crate::service::events::{run_guarded, CloseReason};
use crate::service::handle::{Command, ConnectionHandle};

const READ_BUFFER_SIZE: usize = 8 * 1024;

type OnMessage<M> = Box<dyn Fn(&ConnectionHandle<M>, M) + Send>;
type OnClosed<M> = Box<dyn FnOnce(&ConnectionHandle<M>, CloseReason) + Send>;

/// Binds one transport connection to one framer.
///
/// Nothing is read from the transport until [`start_receiving`] is called,
/// which consumes the manager, so the cycle can only ever be started once.
///
/// [`start_receiving`]: ConnectionManager::start_receiving
pub struct ConnectionManager<F: MessageFramer> {
    handle: ConnectionHandle<F::Message>,
    transport: TransportConnection,
    framer: F,
    commands: mpsc::UnboundedReceiver<Command<F::Message>>,
    on_message: OnMessage<F::Message>,
    on_closed: OnClosed<F::Message>,
}

impl<F: MessageFramer> ConnectionManager<F> {
    pub fn new(
        label: impl Into<String>,
        transport: TransportConnection,
        framer: F,
        on_message: impl Fn(&ConnectionHandle<F::Message>, F::Message) + Send + 'static,
        on_closed: impl FnOnce(&ConnectionHandle<F::Message>, CloseReason) + Send + 'static,
    ) -> Self {
        let (tx, commands) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(
            transport.id(),
            transport.security_mode(),
            label.into(),
            transport.local_addr(),
            transport.remote_addr(),
            tx,
        );

        Self {
            handle,
            transport,
            framer,
            commands,
            on_message: Box::new(on_message),
            on_closed: Box::new(on_closed),
        }
    }

    /// Reference handed to subscribers for this connection.
    pub fn handle(&self) -> &ConnectionHandle<F::Message> {
        &self.handle
    }

    /// Spawn the receive cycle. The returned task ends after the closure
    /// callback has run.
    pub fn start_receiving(self) -> JoinHandle<()> {
        tokio::spawn(self.run().in_current_span())
    }

    /// Close the connection without ever reading from it. The closure
    /// callback runs with `reason`.
    pub async fn abort(self, reason: CloseReason) {
        let Self {
            handle,
            transport,
            framer,
            commands,
            on_closed,
            ..
        } = self;

        let mut stream = transport.into_stream();
        let _ = stream.shutdown().await;
        drop(commands);
        finish(&handle, framer.buffered_len(), reason, on_closed);
    }

    async fn run(self) {
        let Self {
            handle,
            transport,
            mut framer,
            mut commands,
            on_message,
            on_closed,
        } = self;

        let mode = transport.security_mode().label();
        let (mut reader, mut writer) = tokio::io::split(transport.into_stream());
        let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
        let mut decoded = Vec::new();

        let reason = 'cycle: loop {
            tokio::select! {
                // Queued sends go out before the next read is looked at.
                biased;

                command = commands.recv() => match command {
                    Some(Command::Send(message)) => {
                        if let Err(e) = write_message(&mut framer, &mut writer, &handle, &message).await {
                            break CloseReason::Fault(Arc::new(e));
                        }
                    }
                    Some(Command::Close) | None => break CloseReason::LocalClosed,
                },
                read = reader.read_buf(&mut buf) => match read {
                    Ok(0) => {
                        break drain_pending(&mut framer, &mut writer, &handle, &mut commands).await;
                    }
                    Ok(_) => {
                        let result = framer.unframe(&buf, &mut decoded);
                        buf.clear();

                        if !decoded.is_empty() {
                            metrics::record_messages_received(mode, decoded.len());
                        }
                        for message in decoded.drain(..) {
                            if let Err(e) = run_guarded("message", || on_message(&handle, message)) {
                                break 'cycle CloseReason::Fault(Arc::new(e));
                            }
                        }

                        if let Err(e) = result {
                            break CloseReason::Protocol(e);
                        }
                    }
                    Err(e) => break CloseReason::Fault(Arc::new(e)),
                },
            }
        };

        // Best effort: the peer may already be gone.
        let _ = writer.shutdown().await;
        drop(commands);

        finish(&handle, framer.buffered_len(), reason, on_closed);
    }
}

/// Frame and write one outbound message. A message the framer rejects is
/// dropped; only I/O errors are returned.
async fn write_message<F, W>(
    framer: &mut F,
    writer: &mut W,
    handle: &ConnectionHandle<F::Message>,
    message: &F::Message,
) -> io::Result<()>
where
    F: MessageFramer,
    W: AsyncWrite + Unpin,
{
    let bytes = match framer.frame(message) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(
                connection_id = %handle.id(),
                error = %e,
                "Dropping outbound message that could not be framed"
            );
            return Ok(());
        }
    };
    writer.write_all(&bytes).await?;
    writer.flush().await
}

/// The peer closed its side; write what was queued before that was seen.
async fn drain_pending<F, W>(
    framer: &mut F,
    writer: &mut W,
    handle: &ConnectionHandle<F::Message>,
    commands: &mut mpsc::UnboundedReceiver<Command<F::Message>>,
) -> CloseReason
where
    F: MessageFramer,
    W: AsyncWrite + Unpin,
{
    while let Ok(command) = commands.try_recv() {
        match command {
            Command::Send(message) => {
                if let Err(e) = write_message(framer, writer, handle, &message).await {
                    return CloseReason::Fault(Arc::new(e));
                }
            }
            Command::Close => break,
        }
    }
    CloseReason::RemoteClosed
}

fn finish<M>(
    handle: &ConnectionHandle<M>,
    unconsumed_bytes: usize,
    reason: CloseReason,
    on_closed: OnClosed<M>,
) {
    tracing::debug!(
        connection_id = %handle.id(),
        remote = %handle.remote_addr(),
        reason = %reason,
        unconsumed_bytes,
        "TCP connection closed"
    );
    metrics::record_connection_closed(reason.label());

    if let Err(e) = run_guarded("closed", || on_closed(handle, reason)) {
        tracing::error!(connection_id = %handle.id(), error = %e, "Closed subscriber failed");
    }
}
