//! Connection lifecycle tests over loopback TCP.

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use eminet::{
    open, ConnectError, Endpoint, EndpointConfig, EndpointError, OpenError, Socket, SocketError,
    SocketState,
};

mod common;

#[tokio::test]
async fn connect_produces_socket_on_both_sides() {
    let (server, port) = common::open_server();
    let client = common::open_client();

    let (accepted_tx, mut accepted) = mpsc::unbounded_channel();
    server.on_connection(move |socket| {
        let _ = accepted_tx.send(socket.clone());
    });

    let (connected_tx, mut connected) = mpsc::unbounded_channel();
    client.connect("127.0.0.1", port, move |result| {
        let _ = connected_tx.send(result);
    });

    let client_socket = common::next(&mut connected).await.expect("connect should succeed");
    let server_socket = common::next(&mut accepted).await;

    assert_eq!(client_socket.state(), SocketState::Open);
    assert_eq!(server_socket.state(), SocketState::Open);
    assert_eq!(client_socket.remote_addr().port(), port);
    assert_eq!(server_socket.remote_addr(), client_socket.local_addr());
    assert_eq!(server.socket_count(), 1);
    assert_eq!(client.socket_count(), 1);
}

/// Two connected endpoints with disconnect counters wired on both sockets.
struct ConnectedPair {
    server: Endpoint,
    client: Endpoint,
    server_socket: Socket,
    client_socket: Socket,
    server_disconnects: Arc<AtomicUsize>,
    client_disconnects: Arc<AtomicUsize>,
    events: mpsc::UnboundedReceiver<&'static str>,
}

async fn connected_pair() -> ConnectedPair {
    let (server, port) = common::open_server();
    let client = common::open_client();

    let server_disconnects = Arc::new(AtomicUsize::new(0));
    let client_disconnects = Arc::new(AtomicUsize::new(0));
    let (events_tx, events) = mpsc::unbounded_channel();

    let (accepted_tx, mut accepted) = mpsc::unbounded_channel();
    let counter = server_disconnects.clone();
    let tx = events_tx.clone();
    server.on_connection(move |socket| {
        let counter = counter.clone();
        let tx = tx.clone();
        socket.on_disconnect(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send("server");
        });
        let _ = accepted_tx.send(socket.clone());
    });

    let client_socket = client.dial("127.0.0.1", port).await.unwrap();
    let counter = client_disconnects.clone();
    client_socket.on_disconnect(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        let _ = events_tx.send("client");
    });
    let server_socket = common::next(&mut accepted).await;

    ConnectedPair {
        server,
        client,
        server_socket,
        client_socket,
        server_disconnects,
        client_disconnects,
        events,
    }
}

async fn expect_both_disconnects(events: &mut mpsc::UnboundedReceiver<&'static str>) {
    let mut seen = vec![common::next(events).await, common::next(events).await];
    seen.sort();
    assert_eq!(seen, vec!["client", "server"]);
    common::assert_quiet(events, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn client_close_disconnects_both_sides_once() {
    let mut pair = connected_pair().await;

    pair.client_socket.close();
    expect_both_disconnects(&mut pair.events).await;

    assert_eq!(pair.server_disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(pair.client_disconnects.load(Ordering::SeqCst), 1);
    assert!(pair.server_socket.is_closed());
    assert!(pair.client_socket.is_closed());
}

#[tokio::test]
async fn server_close_disconnects_both_sides_once() {
    let mut pair = connected_pair().await;

    pair.server_socket.close();
    expect_both_disconnects(&mut pair.events).await;

    assert_eq!(pair.server_disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(pair.client_disconnects.load(Ordering::SeqCst), 1);
    assert!(pair.client_socket.is_closed());
    assert_eq!(pair.server.socket_count(), 0);
    assert_eq!(pair.client.socket_count(), 0);
}

#[tokio::test]
async fn double_close_emits_disconnect_once() {
    let mut pair = connected_pair().await;

    pair.client_socket.close();
    pair.client_socket.close();
    expect_both_disconnects(&mut pair.events).await;
    pair.client_socket.close();
    common::assert_quiet(&mut pair.events, Duration::from_millis(100)).await;

    assert_eq!(pair.client_disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(pair.server_disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn connect_to_port_without_listener_fails() {
    let client = common::open_client();
    let port = common::unused_port();

    let (tx, mut rx) = mpsc::unbounded_channel();
    client.connect("127.0.0.1", port, move |result| {
        let _ = tx.send(result);
    });

    match common::next(&mut rx).await {
        Err(ConnectError::Io { port: failed_port, .. }) => assert_eq!(failed_port, port),
        other => panic!("expected connect error, got {:?}", other),
    }
    assert_eq!(client.socket_count(), 0);
}

#[tokio::test]
async fn connect_callback_never_runs_inline() {
    let client = common::open_client();
    let ran = Arc::new(AtomicBool::new(false));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let flag = ran.clone();
    client.connect("127.0.0.1", common::unused_port(), move |result| {
        flag.store(true, Ordering::SeqCst);
        let _ = tx.send(result.is_err());
    });

    assert!(!ran.load(Ordering::SeqCst));
    assert!(common::next(&mut rx).await);
    common::assert_quiet(&mut rx, Duration::from_millis(100)).await;
}

#[tokio::test]
async fn connection_listeners_fire_in_registration_order() {
    let (server, port) = common::open_server();
    let client = common::open_client();

    let order = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, mut done) = mpsc::unbounded_channel();

    let first = order.clone();
    server.on_connection(move |_| first.lock().unwrap().push("first"));
    let second = order.clone();
    server.on_connection(move |_| {
        second.lock().unwrap().push("second");
        let _ = done_tx.send(());
    });

    let _socket = client.dial("127.0.0.1", port).await.unwrap();
    common::next(&mut done).await;
    common::assert_quiet(&mut done, Duration::from_millis(100)).await;

    assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
}

#[tokio::test]
async fn data_reaches_the_peer() {
    let (server, port) = common::open_server();
    let client = common::open_client();

    let (data_tx, mut data) = mpsc::unbounded_channel();
    server.on_connection(move |socket| {
        let tx = data_tx.clone();
        socket.on_data(move |bytes| {
            let _ = tx.send(bytes.clone());
        });
    });

    let socket = client.dial("127.0.0.1", port).await.unwrap();
    socket.send("hej").unwrap();

    let mut received = Vec::new();
    while received.len() < 3 {
        received.extend_from_slice(&common::next(&mut data).await);
    }
    assert_eq!(received, b"hej");
}

#[tokio::test]
async fn endpoint_close_tears_down_owned_sockets() {
    let (server, port) = common::open_server();
    let client = common::open_client();

    let (accepted_tx, mut accepted) = mpsc::unbounded_channel();
    server.on_connection(move |socket| {
        let _ = accepted_tx.send(socket.clone());
    });
    let (closed_tx, mut closed) = mpsc::unbounded_channel();
    let server_closed = closed_tx.clone();
    server.on_close(move || {
        let _ = server_closed.send("endpoint");
    });

    let client_socket = client.dial("127.0.0.1", port).await.unwrap();
    client_socket.on_disconnect(move || {
        let _ = closed_tx.send("client");
    });
    let server_socket = common::next(&mut accepted).await;

    server.close();
    server.close();
    assert!(server.is_closed());
    assert!(!server.is_listening());
    assert!(server_socket.is_closed());
    assert_eq!(server.socket_count(), 0);

    let mut seen = vec![common::next(&mut closed).await, common::next(&mut closed).await];
    seen.sort();
    assert_eq!(seen, vec!["client", "endpoint"]);

    assert!(matches!(server.dial("127.0.0.1", port).await, Err(ConnectError::Closed)));
}

#[tokio::test]
async fn bind_failure_is_reported_as_event() {
    let (_first, port) = common::open_server();

    let second = open(EndpointConfig::listen(port).with_address("127.0.0.1".parse().unwrap()))
        .expect("open should not fail on bind errors");
    assert!(!second.is_listening());

    let (tx, mut rx) = mpsc::unbounded_channel();
    second.on_error(move |err| {
        let EndpointError::Bind { addr, source } = err;
        let _ = tx.send((addr.port(), source.kind()));
    });

    assert_eq!(common::next(&mut rx).await, (port, std::io::ErrorKind::AddrInUse));
}

#[tokio::test]
async fn listening_event_reports_bound_address() {
    let (server, port) = common::open_server();
    let (tx, mut rx) = mpsc::unbounded_channel();
    server.on_listening(move |addr| {
        let _ = tx.send(addr);
    });
    assert_eq!(common::next(&mut rx).await.port(), port);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn late_listening_listener_sees_event_once() {
    for _ in 0..50 {
        let (server, port) = common::open_server();
        // Give the workers time to run anything queued by open.
        std::thread::sleep(Duration::from_millis(2));

        let (tx, mut rx) = mpsc::unbounded_channel();
        server.on_listening(move |addr| {
            let _ = tx.send(addr.port());
        });
        assert_eq!(common::next(&mut rx).await, port);
        common::assert_quiet(&mut rx, Duration::from_millis(20)).await;
        server.close();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn late_error_listener_sees_bind_failure_once() {
    let (_first, port) = common::open_server();
    let config = EndpointConfig::listen(port).with_address("127.0.0.1".parse().unwrap());

    for _ in 0..50 {
        let second = open(config.clone()).unwrap();
        std::thread::sleep(Duration::from_millis(2));

        let (tx, mut rx) = mpsc::unbounded_channel();
        second.on_error(move |err| {
            let _ = tx.send(err.to_string());
        });
        let message = common::next(&mut rx).await;
        assert!(message.contains(&port.to_string()), "got {message}");
        common::assert_quiet(&mut rx, Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn listener_removed_before_delivery_misses_bind_outcome() {
    let (server, _port) = common::open_server();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = server.on_listening(move |addr| {
        let _ = tx.send(addr);
    });
    assert!(server.off(id));
    common::assert_quiet(&mut rx, Duration::from_millis(100)).await;
}

#[tokio::test]
async fn closed_endpoint_does_not_report_listening() {
    let (server, _port) = common::open_server();
    server.close();

    let (tx, mut rx) = mpsc::unbounded_channel();
    server.on_listening(move |addr| {
        let _ = tx.send(addr);
    });
    common::assert_quiet(&mut rx, Duration::from_millis(100)).await;
}

#[tokio::test]
async fn accepting_without_port_is_rejected() {
    let config = EndpointConfig {
        accept_connections: true,
        ..EndpointConfig::default()
    };
    assert!(matches!(open(config), Err(OpenError::Config(_))));
}

#[test]
fn open_requires_runtime() {
    assert!(matches!(open(EndpointConfig::client()), Err(OpenError::NoRuntime)));
}

#[tokio::test]
async fn unresolvable_host_fails_to_resolve() {
    let client = common::open_client();
    let result = client.dial("host.invalid", 80).await;
    assert!(matches!(result, Err(ConnectError::Resolve { .. })), "got {:?}", result);
}

#[tokio::test]
async fn connect_timeout_bounds_the_attempt() {
    let timeout = Duration::from_millis(200);
    let client = open(EndpointConfig::client().with_connect_timeout(timeout)).unwrap();
    let (listener, _backlog) = common::saturated_listener().await;
    let port = listener.local_addr().unwrap().port();

    let result = tokio::time::timeout(common::WAIT, client.dial("127.0.0.1", port))
        .await
        .expect("connect timeout should bound the attempt");
    match result {
        Err(ConnectError::Timeout { port: failed_port, timeout: waited, .. }) => {
            assert_eq!(failed_port, port);
            assert_eq!(waited, timeout);
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert_eq!(client.socket_count(), 0);
}

#[tokio::test]
async fn connection_limit_holds_back_extra_peers() {
    let (server, port) =
        common::open_server_with(EndpointConfig::listen(0).with_max_connections(1));
    let client = common::open_client();

    let (accepted_tx, mut accepted) = mpsc::unbounded_channel();
    server.on_connection(move |socket| {
        let _ = accepted_tx.send(socket.clone());
    });

    let _first = client.dial("127.0.0.1", port).await.unwrap();
    let first_accepted = common::next(&mut accepted).await;

    let _second = client.dial("127.0.0.1", port).await.unwrap();
    common::assert_quiet(&mut accepted, Duration::from_millis(200)).await;

    first_accepted.close();
    let second_accepted = common::next(&mut accepted).await;
    assert_ne!(first_accepted.id(), second_accepted.id());
}

#[tokio::test]
async fn closing_a_stalled_socket_frees_its_connection_slot() {
    let (server, port) =
        common::open_server_with(EndpointConfig::listen(0).with_max_connections(1));

    let (accepted_tx, mut accepted) = mpsc::unbounded_channel();
    server.on_connection(move |socket| {
        let _ = accepted_tx.send(socket.clone());
    });

    // Connects and never reads.
    let _stalled_peer = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let stalled = common::next(&mut accepted).await;

    let chunk = Bytes::from(vec![0u8; 256 * 1024]);
    loop {
        match stalled.send(chunk.clone()) {
            Ok(()) => tokio::time::sleep(Duration::from_millis(1)).await,
            Err(e) => {
                assert_eq!(e, SocketError::QueueFull);
                break;
            }
        }
    }
    stalled.close();

    let _next_peer = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let next = common::next(&mut accepted).await;
    assert_ne!(next.id(), stalled.id());
}

#[tokio::test]
async fn demo_scenario_on_port_5001() {
    let client = common::open_client();
    let server = open(EndpointConfig::listen(5001)).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let server_tx = tx.clone();
    server.on_connection(move |socket| {
        let _ = server_tx.send("connection");
        let tx = server_tx.clone();
        socket.on_disconnect(move || {
            let _ = tx.send("server disconnect");
        });
    });

    client.connect("127.0.0.1", 5001, move |result| {
        let socket = result.expect("connect to 5001");
        let disconnect_tx = tx.clone();
        socket.on_disconnect(move || {
            let _ = disconnect_tx.send("client disconnect");
        });
        let _ = tx.send("connected");
        socket.close();
    });

    let mut seen = Vec::new();
    for _ in 0..4 {
        seen.push(common::next(&mut rx).await);
    }
    seen.sort();
    assert_eq!(seen, vec!["client disconnect", "connected", "connection", "server disconnect"]);
    server.close();
}
