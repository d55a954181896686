//! End-to-end lifecycle tests over plaintext TCP.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_test::traced_test;

use tcp_service::framing::{FramerFactory, FramingError, LengthPrefixedFramer, MessageFramer};
use tcp_service::{CloseReason, SecurityMode, ServiceError, ServiceEvent, TcpService};

mod common;
use common::{expect_closed, expect_established, expect_message, length_prefixed, next_event};

type Events = UnboundedReceiver<ServiceEvent<Bytes>>;

async fn start_service() -> (TcpService<LengthPrefixedFramer>, SocketAddr, Events) {
    let mut builder = TcpService::<LengthPrefixedFramer>::builder()
        .endpoint(common::loopback())
        .framer_default();
    let events = builder.subscribe();
    let service = builder.build().unwrap();
    let addr = service.start().await.unwrap();
    (service, addr, events)
}

#[tokio::test]
async fn test_events_arrive_in_connection_order() {
    let (service, addr, mut events) = start_service().await;
    assert_eq!(service.security_mode(), SecurityMode::Normal);

    let mut client = TcpStream::connect(addr).await.unwrap();
    let client_addr = client.local_addr().unwrap();

    let mut both = length_prefixed(b"one");
    both.extend(length_prefixed(b"two"));
    client.write_all(&both).await.unwrap();
    drop(client);

    let conn = expect_established(next_event(&mut events).await);
    assert_eq!(conn.remote_addr(), client_addr);
    assert_eq!(conn.security_mode(), SecurityMode::Normal);
    assert_eq!(conn.label(), "normal");

    let (first_conn, first) = expect_message(next_event(&mut events).await);
    let (second_conn, second) = expect_message(next_event(&mut events).await);
    assert_eq!(first, "one");
    assert_eq!(second, "two");
    assert_eq!(first_conn, conn);
    assert_eq!(second_conn, conn);

    let (closed_conn, reason) = expect_closed(next_event(&mut events).await);
    assert_eq!(closed_conn, conn);
    assert!(reason.is_remote());

    common::assert_no_event(&mut events, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_partial_frames_are_reassembled() {
    let (_service, addr, mut events) = start_service().await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    let conn = expect_established(next_event(&mut events).await);

    let frame = length_prefixed(b"split across writes");
    for chunk in frame.chunks(3) {
        client.write_all(chunk).await.unwrap();
        client.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let (from, message) = expect_message(next_event(&mut events).await);
    assert_eq!(from, conn);
    assert_eq!(message, "split across writes");
}

static NEXT_FRAMER: AtomicUsize = AtomicUsize::new(0);

/// Length-prefixed framer that tags every message with its instance number.
struct TaggedFramer {
    instance: usize,
    inner: LengthPrefixedFramer,
}

impl Default for TaggedFramer {
    fn default() -> Self {
        Self {
            instance: NEXT_FRAMER.fetch_add(1, Ordering::SeqCst),
            inner: LengthPrefixedFramer::new(),
        }
    }
}

impl MessageFramer for TaggedFramer {
    type Message = (usize, Bytes);

    fn unframe(&mut self, data: &[u8], out: &mut Vec<Self::Message>) -> Result<(), FramingError> {
        let mut frames = Vec::new();
        let result = self.inner.unframe(data, &mut frames);
        out.extend(frames.into_iter().map(|frame| (self.instance, frame)));
        result
    }

    fn frame(&mut self, message: &Self::Message) -> Result<Bytes, FramingError> {
        self.inner.frame(&message.1)
    }

    fn buffered_len(&self) -> usize {
        self.inner.buffered_len()
    }
}

#[tokio::test]
async fn test_each_connection_gets_its_own_framer() {
    let mut builder = TcpService::<TaggedFramer>::builder()
        .endpoint(common::loopback())
        .framer_default();
    let mut events = builder.subscribe();
    let service = builder.build().unwrap();
    let addr = service.start().await.unwrap();

    let mut alpha = TcpStream::connect(addr).await.unwrap();
    let alpha_conn = expect_established(next_event(&mut events).await);
    let mut bravo = TcpStream::connect(addr).await.unwrap();
    let bravo_conn = expect_established(next_event(&mut events).await);
    assert_ne!(alpha_conn, bravo_conn);

    // Half a frame on one connection must not leak into the other.
    let alpha_frame = length_prefixed(b"alpha");
    alpha.write_all(&alpha_frame[..6]).await.unwrap();
    alpha.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    bravo.write_all(&length_prefixed(b"bravo")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    alpha.write_all(&alpha_frame[6..]).await.unwrap();

    let mut seen = Vec::new();
    for _ in 0..2 {
        seen.push(expect_message(next_event(&mut events).await));
    }

    let (_, (bravo_instance, bravo_payload)) =
        seen.iter().find(|(conn, _)| *conn == bravo_conn).unwrap();
    let (_, (alpha_instance, alpha_payload)) =
        seen.iter().find(|(conn, _)| *conn == alpha_conn).unwrap();
    assert_eq!(bravo_payload, "bravo");
    assert_eq!(alpha_payload, "alpha");
    assert_ne!(alpha_instance, bravo_instance);
}

#[tokio::test]
async fn test_send_echoes_through_the_framer() {
    let mut builder = TcpService::builder()
        .endpoint(common::loopback())
        .framer(FramerFactory::new(LengthPrefixedFramer::new))
        .on_message(|conn, message: &Bytes| {
            conn.send(message.clone()).unwrap();
        });
    let mut events = builder.subscribe();
    let service = builder.build().unwrap();
    let addr = service.start().await.unwrap();

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(&length_prefixed(b"ping")).await.unwrap();
    client.write_all(&length_prefixed(b"pong")).await.unwrap();

    assert_eq!(common::read_frame(&mut client).await, b"ping");
    assert_eq!(common::read_frame(&mut client).await, b"pong");

    expect_established(next_event(&mut events).await);
}

#[tokio::test]
async fn test_local_close_reaches_peer_and_subscribers() {
    let (service, addr, mut events) = start_service().await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    let conn = expect_established(next_event(&mut events).await);
    assert!(common::eventually(|| service.active_connections() == 1).await);

    conn.send(Bytes::from_static(b"bye")).unwrap();
    conn.close();

    assert_eq!(common::read_frame(&mut client).await, b"bye");
    let mut rest = Vec::new();
    client.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());

    let (closed, reason) = expect_closed(next_event(&mut events).await);
    assert_eq!(closed, conn);
    assert!(matches!(reason, CloseReason::LocalClosed));
    assert!(conn.is_closed());
    assert!(matches!(
        conn.send(Bytes::from_static(b"late")),
        Err(ServiceError::ConnectionClosed(id)) if id == conn.id()
    ));
    assert!(common::eventually(|| service.active_connections() == 0).await);
}

#[tokio::test]
async fn test_second_start_reports_already_running() {
    let (service, addr, _events) = start_service().await;
    assert!(service.is_running().await);
    assert_eq!(service.local_addr().await, Some(addr));

    match service.start().await {
        Err(ServiceError::AlreadyRunning(running)) => assert_eq!(running, addr),
        other => panic!("expected AlreadyRunning, got {other:?}"),
    }
}

#[tokio::test]
async fn test_stop_leaves_live_connections_running() {
    let (service, addr, mut events) = start_service().await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    let conn = expect_established(next_event(&mut events).await);

    service.stop().await;
    assert!(!service.is_running().await);
    assert!(TcpStream::connect(addr).await.is_err());

    client.write_all(&length_prefixed(b"still here")).await.unwrap();
    let (from, message) = expect_message(next_event(&mut events).await);
    assert_eq!(from, conn);
    assert_eq!(message, "still here");

    drop(client);
    let (closed, reason) = expect_closed(next_event(&mut events).await);
    assert_eq!(closed, conn);
    assert!(reason.is_remote());
}

#[tokio::test]
async fn test_service_restarts_after_stop() {
    let (service, _addr, mut events) = start_service().await;
    service.stop().await;

    let addr = service.start().await.unwrap();
    let _client = TcpStream::connect(addr).await.unwrap();
    expect_established(next_event(&mut events).await);
}

#[tokio::test]
#[traced_test]
async fn test_accepted_connection_is_logged() {
    let (_service, addr, mut events) = start_service().await;

    let client = TcpStream::connect(addr).await.unwrap();
    let conn = expect_established(next_event(&mut events).await);

    assert!(logs_contain("TCP connection accepted"));
    assert!(logs_contain("mode=Normal"));
    assert!(logs_contain(&format!("remote={}", client.local_addr().unwrap())));
    assert!(logs_contain(&format!("local={}", client.peer_addr().unwrap())));
    assert!(logs_contain(&format!("connection_id={}", conn.id())));
}

#[tokio::test]
async fn test_reply_survives_peer_half_close() {
    let service = TcpService::builder()
        .endpoint(common::loopback())
        .framer(FramerFactory::new(LengthPrefixedFramer::new))
        .on_message(|conn, message: &Bytes| {
            let _ = conn.send(message.clone());
        })
        .build()
        .unwrap();
    let addr = service.start().await.unwrap();

    for round in 0..50 {
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(&length_prefixed(b"ping")).await.unwrap();
        client.shutdown().await.unwrap();

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, length_prefixed(b"ping"), "reply lost in round {round}");
    }
}
