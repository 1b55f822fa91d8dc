//! Endpoints: the entry point for accepting and initiating connections.
//!
//! # Responsibilities
//! - Validate configuration and bind the listening side, if any
//! - Run the accept loop and announce inbound sockets via `connection`
//! - Perform outbound connect attempts and resolve their callbacks
//! - Own every live socket and close them on teardown
//!
//! # Design Decisions
//! - `open` never awaits: binding is synchronous, bind failures become an
//!   `error` event
//! - The bind outcome is latched: `listening` / `error` reach each listener
//!   of that kind once, whenever it registers
//! - Every callback runs on the endpoint's dispatcher, never inline
//! - Dropping the last handle stops the accept loop; `close` also closes
//!   owned sockets

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::broadcast;

use crate::config::{validate_config, EndpointConfig};
use crate::event::{Dispatcher, Event, EventNotifier, ListenerId};
use crate::lifecycle::Shutdown;
use crate::net::connection::SocketRegistry;
use crate::net::error::{ConnectError, EndpointError, OpenError};
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};
use crate::net::socket::{Socket, SocketDriver};

/// Pause after a failed accept so resource exhaustion does not spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Event kinds an endpoint emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointEventKind {
    /// A peer connected to the listening side.
    Connection,
    /// The listening side is bound.
    Listening,
    /// The listening side could not be set up.
    Error,
    /// The endpoint was closed.
    Close,
}

/// Events delivered to endpoint listeners.
#[derive(Debug)]
pub enum EndpointEvent {
    Connection(Socket),
    Listening(SocketAddr),
    Error(Arc<EndpointError>),
    Close,
}

impl Event for EndpointEvent {
    type Kind = EndpointEventKind;

    fn kind(&self) -> EndpointEventKind {
        match self {
            EndpointEvent::Connection(_) => EndpointEventKind::Connection,
            EndpointEvent::Listening(_) => EndpointEventKind::Listening,
            EndpointEvent::Error(_) => EndpointEventKind::Error,
            EndpointEvent::Close => EndpointEventKind::Close,
        }
    }
}

/// What binding the listening side produced. Fixed for the endpoint's life.
#[derive(Debug, Clone)]
enum BindOutcome {
    Listening(SocketAddr),
    Failed(Arc<EndpointError>),
}

struct EndpointInner {
    config: EndpointConfig,
    runtime: Handle,
    events: EventNotifier<EndpointEvent>,
    dispatcher: Dispatcher,
    sockets: Arc<SocketRegistry>,
    shutdown: Shutdown,
    bind_outcome: Option<BindOutcome>,
    local_addr: Mutex<Option<SocketAddr>>,
}

/// A local networking object that can listen and/or dial out.
///
/// Cheap to clone; clones share the same endpoint.
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<EndpointInner>,
}

/// Create an endpoint.
///
/// Configuration problems, and calling outside a Tokio runtime, are returned
/// here. A failure to bind the listening port is not: it is reported as an
/// `error` event so `open` keeps the same shape whether or not the port is
/// free. Since `open` returns before anyone can register, `listening` and
/// `error` are delivered to each listener when it registers.
pub fn open(config: EndpointConfig) -> Result<Endpoint, OpenError> {
    validate_config(&config).map_err(OpenError::Config)?;
    let runtime = Handle::try_current().map_err(|_| OpenError::NoRuntime)?;

    let (listener, bind_outcome) = if config.accept_connections {
        match bind_listener(&config) {
            Ok(listener) => {
                let addr = listener.local_addr;
                (Some(listener), Some(BindOutcome::Listening(addr)))
            }
            Err(e) => (None, Some(BindOutcome::Failed(Arc::new(e)))),
        }
    } else {
        tracing::debug!("Client endpoint opened");
        (None, None)
    };

    let endpoint = Endpoint {
        inner: Arc::new(EndpointInner {
            dispatcher: Dispatcher::spawn(&runtime),
            runtime,
            events: EventNotifier::new(),
            sockets: Arc::new(SocketRegistry::new()),
            shutdown: Shutdown::new(),
            local_addr: Mutex::new(listener.as_ref().map(|bound| bound.local_addr)),
            bind_outcome,
            config,
        }),
    };

    if let Some(bound) = listener {
        let shutdown = endpoint.inner.shutdown.subscribe();
        let inner = Arc::downgrade(&endpoint.inner);
        endpoint.inner.runtime.spawn(accept_loop(inner, bound.listener, shutdown));
    }

    Ok(endpoint)
}

struct BoundListener {
    listener: Listener,
    local_addr: SocketAddr,
}

fn bind_listener(config: &EndpointConfig) -> Result<BoundListener, EndpointError> {
    // Validation guarantees a port when accepting.
    let addr = SocketAddr::new(config.address, config.port.unwrap_or_default());

    match Listener::bind(addr, config.max_connections) {
        Ok(listener) => {
            let local_addr = listener.local_addr().unwrap_or(addr);
            tracing::info!(
                address = %local_addr,
                max_connections = config.max_connections,
                "Listening"
            );
            Ok(BoundListener { listener, local_addr })
        }
        Err(e) => {
            let source = match e {
                ListenerError::Bind(source) | ListenerError::Accept(source) => source,
                ListenerError::Closed => std::io::Error::other("listener closed"),
            };
            tracing::warn!(address = %addr, error = %source, "Failed to listen");
            Err(EndpointError::Bind { addr, source })
        }
    }
}

impl Endpoint {
    pub fn config(&self) -> &EndpointConfig {
        &self.inner.config
    }

    /// Address of the listening side while it is bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.lock_local_addr()
    }

    pub fn is_listening(&self) -> bool {
        self.local_addr().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_triggered()
    }

    /// Number of live sockets this endpoint owns.
    pub fn socket_count(&self) -> usize {
        self.inner.sockets.len()
    }

    /// Register a listener for `kind`.
    ///
    /// A `listening` or `error` listener is also queued the bind outcome, if
    /// it was of that kind. Removing the listener before that delivery runs
    /// cancels it.
    pub fn on<F>(&self, kind: EndpointEventKind, callback: F) -> ListenerId
    where
        F: Fn(&EndpointEvent) + Send + Sync + 'static,
    {
        let id = self.inner.events.on(kind, callback);
        if let Some(event) = self.bind_event(kind) {
            let endpoint = self.clone();
            self.inner.dispatcher.dispatch(move || {
                endpoint.inner.events.emit_to(id, &event);
            });
        }
        id
    }

    /// Register a listener for inbound sockets.
    pub fn on_connection<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&Socket) + Send + Sync + 'static,
    {
        self.on(EndpointEventKind::Connection, move |event| {
            if let EndpointEvent::Connection(socket) = event {
                callback(socket);
            }
        })
    }

    pub fn on_listening<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(SocketAddr) + Send + Sync + 'static,
    {
        self.on(EndpointEventKind::Listening, move |event| {
            if let EndpointEvent::Listening(addr) = event {
                callback(*addr);
            }
        })
    }

    pub fn on_error<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&EndpointError) + Send + Sync + 'static,
    {
        self.on(EndpointEventKind::Error, move |event| {
            if let EndpointEvent::Error(err) = event {
                callback(err.as_ref());
            }
        })
    }

    pub fn on_close<F>(&self, callback: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on(EndpointEventKind::Close, move |_| callback())
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.events.off(id)
    }

    /// Start a single outbound connection attempt to `host:port`.
    ///
    /// `callback` runs exactly once, on the endpoint's dispatcher, after the
    /// attempt resolves. It never runs before `connect` returns. There is no
    /// retry.
    pub fn connect<F>(&self, host: impl Into<String>, port: u16, callback: F)
    where
        F: FnOnce(Result<Socket, ConnectError>) + Send + 'static,
    {
        let endpoint = self.clone();
        let host = host.into();

        self.inner.runtime.spawn(async move {
            match endpoint.establish(&host, port).await {
                Ok((socket, driver)) => {
                    tracing::debug!(
                        socket_id = %socket.id(),
                        peer_addr = %socket.remote_addr(),
                        "Connected"
                    );
                    endpoint.inner.dispatcher.dispatch(move || callback(Ok(socket)));
                    driver.spawn(&endpoint.inner.runtime);
                }
                Err(e) => {
                    tracing::debug!(host = %host, port, error = %e, "Connect failed");
                    endpoint.inner.dispatcher.dispatch(move || callback(Err(e)));
                }
            }
        });
    }

    /// Async form of [`Endpoint::connect`] for callers already in async code.
    pub async fn dial(&self, host: &str, port: u16) -> Result<Socket, ConnectError> {
        let (socket, driver) = self.establish(host, port).await?;
        driver.spawn(&self.inner.runtime);
        Ok(socket)
    }

    /// Tear the endpoint down. Idempotent.
    ///
    /// Stops accepting, closes every owned socket (each emits `disconnect`),
    /// then emits `close`.
    pub fn close(&self) {
        if !self.inner.shutdown.trigger() {
            return;
        }
        let was_listening = self.lock_local_addr().take();

        let sockets = self.inner.sockets.drain();
        tracing::info!(
            listening = ?was_listening,
            open_sockets = sockets.len(),
            "Closing endpoint"
        );
        for socket in sockets {
            socket.close();
        }

        self.emit(EndpointEvent::Close);
    }

    /// Resolve, connect, and wrap the stream in an open socket.
    ///
    /// The returned driver must be spawned after the socket has been handed
    /// out, so `disconnect` can never overtake the announcement.
    async fn establish(
        &self,
        host: &str,
        port: u16,
    ) -> Result<(Socket, SocketDriver), ConnectError> {
        if self.is_closed() {
            return Err(ConnectError::Closed);
        }

        let attempt = connect_stream(host, port);
        let stream = match self.inner.config.connect_timeout() {
            Some(timeout) => tokio::time::timeout(timeout, attempt)
                .await
                .map_err(|_| ConnectError::Timeout {
                    host: host.to_string(),
                    port,
                    timeout,
                })??,
            None => attempt.await?,
        };

        let (socket, driver) = self.adopt(stream, None).map_err(|source| ConnectError::Io {
            host: host.to_string(),
            port,
            source,
        })?;

        // close() may have drained the registry while the attempt was in flight.
        if self.is_closed() {
            socket.close();
            return Err(ConnectError::Closed);
        }
        Ok((socket, driver))
    }

    /// Wrap a connected stream, register it, and mark it open.
    fn adopt(
        &self,
        stream: TcpStream,
        permit: Option<ConnectionPermit>,
    ) -> std::io::Result<(Socket, SocketDriver)> {
        let (socket, driver) =
            Socket::attach(stream, self.inner.dispatcher.clone(), &self.inner.sockets, permit)?;
        self.inner.sockets.insert(socket.clone());
        socket.mark_open();
        Ok((socket, driver))
    }

    fn accept(&self, stream: TcpStream, peer_addr: SocketAddr, permit: ConnectionPermit) {
        match self.adopt(stream, Some(permit)) {
            Ok((socket, _)) if self.is_closed() => socket.close(),
            Ok((socket, driver)) => {
                tracing::debug!(
                    socket_id = %socket.id(),
                    peer_addr = %peer_addr,
                    "Inbound socket open"
                );
                self.emit(EndpointEvent::Connection(socket));
                driver.spawn(&self.inner.runtime);
            }
            Err(e) => {
                tracing::debug!(peer_addr = %peer_addr, error = %e, "Dropped inbound connection");
            }
        }
    }

    /// The latched bind outcome, as an event of `kind`, if it has one.
    fn bind_event(&self, kind: EndpointEventKind) -> Option<EndpointEvent> {
        match (kind, self.inner.bind_outcome.as_ref()?) {
            (EndpointEventKind::Listening, BindOutcome::Listening(addr)) if !self.is_closed() => {
                Some(EndpointEvent::Listening(*addr))
            }
            (EndpointEventKind::Error, BindOutcome::Failed(err)) => {
                Some(EndpointEvent::Error(Arc::clone(err)))
            }
            _ => None,
        }
    }

    fn emit(&self, event: EndpointEvent) {
        let endpoint = self.clone();
        self.inner.dispatcher.dispatch(move || {
            endpoint.inner.events.emit(&event);
        });
    }

    fn lock_local_addr(&self) -> MutexGuard<'_, Option<SocketAddr>> {
        self.inner.local_addr.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("accept_connections", &self.inner.config.accept_connections)
            .field("local_addr", &self.local_addr())
            .field("sockets", &self.socket_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Resolve `host` and connect to the first address that accepts.
async fn connect_stream(host: &str, port: u16) -> Result<TcpStream, ConnectError> {
    let addrs: Vec<SocketAddr> = match tokio::net::lookup_host((host, port)).await {
        Ok(addrs) => addrs.collect(),
        Err(source) => {
            return Err(ConnectError::Resolve {
                host: host.to_string(),
                port,
                source,
            })
        }
    };
    if addrs.is_empty() {
        return Err(ConnectError::Resolve {
            host: host.to_string(),
            port,
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses found"),
        });
    }

    TcpStream::connect(&addrs[..]).await.map_err(|source| ConnectError::Io {
        host: host.to_string(),
        port,
        source,
    })
}

async fn accept_loop(
    endpoint: Weak<EndpointInner>,
    listener: Listener,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr, permit)) => {
                    let Some(inner) = endpoint.upgrade() else { break };
                    Endpoint { inner }.accept(stream, peer_addr, permit);
                }
                Err(ListenerError::Closed) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },
        }
    }

    tracing::debug!(address = ?listener.local_addr().ok(), "Accept loop stopped");
}
