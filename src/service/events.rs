//! Lifecycle events and their subscribers.
//!
//! Per connection, subscribers observe `established`, then zero or more
//! `message arrived`, then exactly one `closed`. Nothing is guaranteed
//! about the relative order of events from different connections.
//!
//! Callbacks run on the connection's own task and are invoked concurrently
//! for different connections, so they must be reentrant. Within a single
//! connection they are invoked one at a time. A callback that blocks stalls
//! its connection's receive cycle. A callback that panics ends the
//! connection with [`CloseReason::Fault`]; `closed` is still published.

use std::any::Any;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::framing::FramingError;
use crate::service::handle::ConnectionHandle;

/// Why a connection's receive cycle ended.
#[derive(Debug, Clone)]
pub enum CloseReason {
    /// The peer closed its side of the stream.
    RemoteClosed,
    /// [`ConnectionHandle::close`] was called.
    LocalClosed,
    /// I/O error while reading or writing.
    Fault(Arc<std::io::Error>),
    /// The peer sent bytes the framer rejected.
    Protocol(FramingError),
}

impl CloseReason {
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::RemoteClosed)
    }

    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::RemoteClosed => "remote_closed",
            Self::LocalClosed => "local_closed",
            Self::Fault(_) => "fault",
            Self::Protocol(_) => "protocol",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemoteClosed => f.write_str("closed by remote peer"),
            Self::LocalClosed => f.write_str("closed locally"),
            Self::Fault(e) => write!(f, "transport fault: {}", e),
            Self::Protocol(e) => write!(f, "protocol error: {}", e),
        }
    }
}

/// Owned form of a lifecycle event, delivered to channel subscribers.
#[derive(Debug, Clone)]
pub enum ServiceEvent<M> {
    Established(ConnectionHandle<M>),
    MessageArrived(ConnectionHandle<M>, M),
    Closed(ConnectionHandle<M>, CloseReason),
}

impl<M> ServiceEvent<M> {
    /// The connection the event belongs to.
    pub fn connection(&self) -> &ConnectionHandle<M> {
        match self {
            Self::Established(conn) | Self::MessageArrived(conn, _) | Self::Closed(conn, _) => {
                conn
            }
        }
    }
}

pub type EstablishedCallback<M> = Arc<dyn Fn(&ConnectionHandle<M>) + Send + Sync>;
pub type MessageCallback<M> = Arc<dyn Fn(&ConnectionHandle<M>, &M) + Send + Sync>;
pub type ClosedCallback<M> = Arc<dyn Fn(&ConnectionHandle<M>, &CloseReason) + Send + Sync>;

/// Registered subscribers for the three lifecycle events.
///
/// Fixed before the service starts, so publishing never takes a lock.
pub struct EventHandlers<M> {
    established: Vec<EstablishedCallback<M>>,
    message: Vec<MessageCallback<M>>,
    closed: Vec<ClosedCallback<M>>,
}

impl<M> EventHandlers<M> {
    pub fn new() -> Self {
        Self {
            established: Vec::new(),
            message: Vec::new(),
            closed: Vec::new(),
        }
    }

    pub fn on_established(&mut self, callback: impl Fn(&ConnectionHandle<M>) + Send + Sync + 'static) {
        self.established.push(Arc::new(callback));
    }

    pub fn on_message(
        &mut self,
        callback: impl Fn(&ConnectionHandle<M>, &M) + Send + Sync + 'static,
    ) {
        self.message.push(Arc::new(callback));
    }

    pub fn on_closed(
        &mut self,
        callback: impl Fn(&ConnectionHandle<M>, &CloseReason) + Send + Sync + 'static,
    ) {
        self.closed.push(Arc::new(callback));
    }

    pub fn publish_established(&self, conn: &ConnectionHandle<M>) {
        for callback in &self.established {
            callback(conn);
        }
    }

    pub fn publish_message(&self, conn: &ConnectionHandle<M>, message: &M) {
        for callback in &self.message {
            callback(conn, message);
        }
    }

    pub fn publish_closed(&self, conn: &ConnectionHandle<M>, reason: &CloseReason) {
        for callback in &self.closed {
            callback(conn, reason);
        }
    }

}

/// Run subscriber code, converting a panic into a transport fault.
pub(crate) fn run_guarded(event: &'static str, callback: impl FnOnce()) -> Result<(), io::Error> {
    panic::catch_unwind(AssertUnwindSafe(callback)).map_err(|payload| {
        io::Error::other(format!(
            "{} subscriber panicked: {}",
            event,
            panic_message(payload.as_ref())
        ))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

impl<M: Clone + Send + Sync + 'static> EventHandlers<M> {
    /// Forward all three events into an unbounded channel.
    ///
    /// Events of one connection keep their order in the channel. A dropped
    /// receiver is ignored.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ServiceEvent<M>> {
        let (tx, rx) = mpsc::unbounded_channel();

        let established = tx.clone();
        self.on_established(move |conn| {
            let _ = established.send(ServiceEvent::Established(conn.clone()));
        });
        let arrived = tx.clone();
        self.on_message(move |conn, message| {
            let _ = arrived.send(ServiceEvent::MessageArrived(conn.clone(), message.clone()));
        });
        self.on_closed(move |conn, reason| {
            let _ = tx.send(ServiceEvent::Closed(conn.clone(), reason.clone()));
        });

        rx
    }
}

impl<M> Default for EventHandlers<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for EventHandlers<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("established", &self.established.len())
            .field("message", &self.message.len())
            .field("closed", &self.closed.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::net::connection::{ConnectionId, SecurityMode};

    fn handle() -> ConnectionHandle<String> {
        let (tx, _rx) = mpsc::unbounded_channel();
        ConnectionHandle::new(
            ConnectionId::new(),
            SecurityMode::Normal,
            "normal".into(),
            "127.0.0.1:1".parse().unwrap(),
            "127.0.0.1:2".parse().unwrap(),
            tx,
        )
    }

    #[test]
    fn every_subscriber_is_called_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut handlers = EventHandlers::<String>::new();
        for name in ["first", "second"] {
            let seen = Arc::clone(&seen);
            handlers.on_message(move |_, message| {
                seen.lock().unwrap().push(format!("{name}:{message}"));
            });
        }

        handlers.publish_message(&handle(), &"hi".to_string());

        assert_eq!(*seen.lock().unwrap(), vec!["first:hi", "second:hi"]);
    }

    #[test]
    fn channel_subscriber_receives_owned_events() {
        let mut handlers = EventHandlers::<String>::new();
        let mut rx = handlers.subscribe();
        let conn = handle();

        handlers.publish_established(&conn);
        handlers.publish_message(&conn, &"payload".to_string());
        handlers.publish_closed(&conn, &CloseReason::RemoteClosed);

        assert!(matches!(rx.try_recv().unwrap(), ServiceEvent::Established(c) if c == conn));
        assert!(matches!(rx.try_recv().unwrap(), ServiceEvent::MessageArrived(_, m) if m == "payload"));
        assert!(matches!(rx.try_recv().unwrap(), ServiceEvent::Closed(_, r) if r.is_remote()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn guarded_callback_reports_panic_as_error() {
        assert!(run_guarded("message", || {}).is_ok());

        let err = run_guarded("message", || panic!("subscriber bug")).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::Other);
        assert_eq!(err.to_string(), "message subscriber panicked: subscriber bug");
    }

    #[test]
    fn close_reason_labels() {
        assert_eq!(CloseReason::LocalClosed.label(), "local_closed");
        let reason = CloseReason::Protocol(FramingError::Decode("bad".into()));
        assert_eq!(reason.to_string(), "protocol error: malformed frame: bad");
    }
}
