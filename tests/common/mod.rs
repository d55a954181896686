//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::fmt::Debug;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use tcp_service::{CloseReason, ConnectionHandle, ServiceEvent, TlsCredential};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// Wait for the next lifecycle event, failing the test after [`EVENT_TIMEOUT`].
pub async fn next_event<M>(rx: &mut UnboundedReceiver<ServiceEvent<M>>) -> ServiceEvent<M> {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for a service event")
        .expect("event channel closed")
}

/// Fail if any event shows up within `wait`.
pub async fn assert_no_event<M: Debug>(rx: &mut UnboundedReceiver<ServiceEvent<M>>, wait: Duration) {
    if let Ok(Some(event)) = tokio::time::timeout(wait, rx.recv()).await {
        panic!("unexpected event: {event:?}");
    }
}

/// Poll `check` until it holds or [`EVENT_TIMEOUT`] passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Encode `payload` as a 4-byte big-endian length-prefixed frame.
pub fn length_prefixed(payload: &[u8]) -> Vec<u8> {
    let mut framed = (payload.len() as u32).to_be_bytes().to_vec();
    framed.extend_from_slice(payload);
    framed
}

/// Read one length-prefixed frame.
pub async fn read_frame(stream: &mut (impl AsyncRead + Unpin)) -> Vec<u8> {
    let len = stream.read_u32().await.unwrap() as usize;
    let mut payload = vec![0; len];
    stream.read_exact(&mut payload).await.unwrap();
    payload
}

/// A self-signed `localhost` certificate and the server credential built from it.
pub struct TestCertificate {
    pub credential: TlsCredential,
    pub cert: CertificateDer<'static>,
}

pub fn test_certificate() -> TestCertificate {
    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert = CertificateDer::from(generated.serialize_der().unwrap());
    let key = PrivateKeyDer::Pkcs8(generated.serialize_private_key_der().into());

    TestCertificate {
        credential: TlsCredential::from_der(vec![cert.clone()], key).unwrap(),
        cert,
    }
}

/// Client configuration trusting only `trusted`.
pub fn client_config(trusted: &CertificateDer<'static>) -> Arc<ClientConfig> {
    let mut roots = RootCertStore::empty();
    roots.add(trusted.clone()).unwrap();

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Arc::new(config)
}

pub async fn connect_tls(
    addr: SocketAddr,
    config: Arc<ClientConfig>,
) -> std::io::Result<TlsStream<TcpStream>> {
    let tcp = TcpStream::connect(addr).await?;
    let server_name = ServerName::try_from("localhost").unwrap();
    TlsConnector::from(config).connect(server_name, tcp).await
}

pub fn expect_established<M: Debug>(event: ServiceEvent<M>) -> ConnectionHandle<M> {
    match event {
        ServiceEvent::Established(conn) => conn,
        other => panic!("expected established, got {other:?}"),
    }
}

pub fn expect_message<M: Debug>(event: ServiceEvent<M>) -> (ConnectionHandle<M>, M) {
    match event {
        ServiceEvent::MessageArrived(conn, message) => (conn, message),
        other => panic!("expected message arrived, got {other:?}"),
    }
}

pub fn expect_closed<M: Debug>(event: ServiceEvent<M>) -> (ConnectionHandle<M>, CloseReason) {
    match event {
        ServiceEvent::Closed(conn, reason) => (conn, reason),
        other => panic!("expected closed, got {other:?}"),
    }
}
