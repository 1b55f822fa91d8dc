//! Shared helpers for endpoint integration tests.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;

use eminet::{open, Endpoint, EndpointConfig};

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// Open a loopback listening endpoint on an ephemeral port.
pub fn open_server() -> (Endpoint, u16) {
    open_server_with(EndpointConfig::listen(0))
}

pub fn open_server_with(config: EndpointConfig) -> (Endpoint, u16) {
    let server = open(config.with_address(IpAddr::V4(Ipv4Addr::LOCALHOST))).unwrap();
    let port = server.local_addr().expect("server should be listening").port();
    (server, port)
}

pub fn open_client() -> Endpoint {
    open(EndpointConfig::client()).unwrap()
}

/// Receive the next value or fail the test after [`WAIT`].
pub async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Assert nothing arrives within `window`.
#[allow(dead_code)]
pub async fn assert_quiet<T: std::fmt::Debug>(
    rx: &mut mpsc::UnboundedReceiver<T>,
    window: Duration,
) {
    if let Ok(Some(value)) = tokio::time::timeout(window, rx.recv()).await {
        panic!("unexpected event: {:?}", value);
    }
}

/// A port nothing is listening on.
#[allow(dead_code)]
pub fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// A loopback listener that never accepts, with its accept queue filled so
/// further connect attempts hang. Keep the returned streams alive.
#[allow(dead_code)]
pub async fn saturated_listener() -> (TcpListener, Vec<TcpStream>) {
    let socket = TcpSocket::new_v4().unwrap();
    socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let listener = socket.listen(1).unwrap();
    let addr = listener.local_addr().unwrap();

    let mut backlog = Vec::new();
    for _ in 0..64 {
        match tokio::time::timeout(Duration::from_millis(100), TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => backlog.push(stream),
            _ => break,
        }
    }
    (listener, backlog)
}
