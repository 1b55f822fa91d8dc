//! One established connection and its lifecycle.
//!
//! # State Machine
//! ```text
//! Connecting → Open → Closed
//! ```
//! Outbound sockets are `Connecting` until the connect attempt resolves;
//! inbound sockets are handed out already `Open`. `Closed` is terminal and is
//! entered exactly once, which is what makes `disconnect` fire exactly once.
//!
//! # Design Decisions
//! - A driver task owns the `TcpStream`; the handle only talks to it through
//!   channels
//! - Local close and remote termination share one transition
//! - Transport failures end in `disconnect`, never in an error value

use bytes::{Bytes, BytesMut};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};

use crate::event::{Dispatcher, Event, EventNotifier, ListenerId};
use crate::net::connection::{SocketId, SocketRegistry};
use crate::net::error::SocketError;
use crate::net::listener::ConnectionPermit;

/// Initial capacity of the per-socket read buffer.
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Chunks `send` may queue ahead of the driver before reporting backpressure.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Connection state of a [`Socket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Connecting,
    Open,
    Closed,
}

/// Event kinds a socket emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketEventKind {
    /// Bytes arrived from the peer.
    Data,
    /// The connection reached `Closed`.
    Disconnect,
}

/// Events delivered to socket listeners.
#[derive(Debug, Clone)]
pub enum SocketEvent {
    Data(Bytes),
    Disconnect,
}

impl Event for SocketEvent {
    type Kind = SocketEventKind;

    fn kind(&self) -> SocketEventKind {
        match self {
            SocketEvent::Data(_) => SocketEventKind::Data,
            SocketEvent::Disconnect => SocketEventKind::Disconnect,
        }
    }
}

/// Why a socket driver stopped.
#[derive(Debug)]
enum CloseCause {
    Local,
    Remote,
    Failed(io::Error),
}

struct SocketInner {
    id: SocketId,
    remote_addr: SocketAddr,
    local_addr: SocketAddr,
    state: Mutex<SocketState>,
    events: EventNotifier<SocketEvent>,
    dispatcher: Dispatcher,
    outbound: mpsc::Sender<Bytes>,
    close_tx: watch::Sender<bool>,
    registry: Weak<SocketRegistry>,
}

/// Handle to one connection, inbound or outbound.
///
/// Clones refer to the same connection. The owning endpoint keeps a clone
/// until the socket closes.
#[derive(Clone)]
pub struct Socket {
    inner: Arc<SocketInner>,
}

impl Socket {
    /// Wrap a connected stream. The socket starts out `Connecting`; the driver
    /// must be started with [`SocketDriver::spawn`] once the socket has been
    /// announced.
    pub(crate) fn attach(
        stream: TcpStream,
        dispatcher: Dispatcher,
        registry: &Arc<SocketRegistry>,
        permit: Option<ConnectionPermit>,
    ) -> io::Result<(Socket, SocketDriver)> {
        let remote_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let (close_tx, close_rx) = watch::channel(false);

        let socket = Socket {
            inner: Arc::new(SocketInner {
                id: SocketId::new(),
                remote_addr,
                local_addr,
                state: Mutex::new(SocketState::Connecting),
                events: EventNotifier::new(),
                dispatcher,
                outbound: outbound_tx,
                close_tx,
                registry: Arc::downgrade(registry),
            }),
        };

        let driver = SocketDriver {
            socket: socket.clone(),
            stream,
            outbound: outbound_rx,
            close_rx,
            _permit: permit,
        };

        Ok((socket, driver))
    }

    pub fn id(&self) -> SocketId {
        self.inner.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.remote_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn state(&self) -> SocketState {
        *self.lock_state()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SocketState::Closed
    }

    /// Register a listener for `kind`.
    pub fn on<F>(&self, kind: SocketEventKind, callback: F) -> ListenerId
    where
        F: Fn(&SocketEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, callback)
    }

    /// Register a listener that runs once, when the socket closes.
    ///
    /// Registering after the socket has already closed has no effect.
    pub fn on_disconnect<F>(&self, callback: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on(SocketEventKind::Disconnect, move |_| callback())
    }

    /// Register a listener for raw bytes received from the peer.
    pub fn on_data<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&Bytes) + Send + Sync + 'static,
    {
        self.on(SocketEventKind::Data, move |event| {
            if let SocketEvent::Data(bytes) = event {
                callback(bytes);
            }
        })
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.events.off(id)
    }

    /// Queue bytes for the peer. There is no framing: the peer sees a byte
    /// stream.
    ///
    /// Returns `SocketError::QueueFull` when [`OUTBOUND_QUEUE_CAPACITY`]
    /// chunks are already waiting, i.e. the peer is not keeping up.
    pub fn send(&self, data: impl Into<Bytes>) -> Result<(), SocketError> {
        if self.state() != SocketState::Open {
            return Err(SocketError::Closed);
        }
        self.inner.outbound.try_send(data.into()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SocketError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SocketError::Closed,
        })
    }

    /// Close the connection. Idempotent.
    ///
    /// The first call moves the socket to `Closed`, queues `disconnect`, and
    /// tells the driver to shut the stream down so the peer sees EOF.
    pub fn close(&self) {
        if self.transition_closed() {
            tracing::debug!(
                socket_id = %self.inner.id,
                peer_addr = %self.inner.remote_addr,
                "Socket closed locally"
            );
        }
    }

    pub(crate) fn mark_open(&self) {
        let mut state = self.lock_state();
        if *state == SocketState::Connecting {
            *state = SocketState::Open;
        }
    }

    /// Move to `Closed`. Returns true only for the call that made the move.
    fn transition_closed(&self) -> bool {
        {
            let mut state = self.lock_state();
            if *state == SocketState::Closed {
                return false;
            }
            *state = SocketState::Closed;
        }

        self.inner.close_tx.send_replace(true);
        if let Some(registry) = self.inner.registry.upgrade() {
            registry.remove(self.inner.id);
        }
        self.deliver(SocketEvent::Disconnect);
        true
    }

    fn deliver(&self, event: SocketEvent) {
        let socket = self.clone();
        self.inner.dispatcher.dispatch(move || {
            socket.inner.events.emit(&event);
        });
    }

    fn lock_state(&self) -> MutexGuard<'_, SocketState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("id", &self.inner.id)
            .field("remote_addr", &self.inner.remote_addr)
            .field("local_addr", &self.inner.local_addr)
            .field("state", &self.state())
            .finish()
    }
}

/// Task body that owns a socket's stream.
pub(crate) struct SocketDriver {
    socket: Socket,
    stream: TcpStream,
    outbound: mpsc::Receiver<Bytes>,
    close_rx: watch::Receiver<bool>,
    _permit: Option<ConnectionPermit>,
}

impl SocketDriver {
    pub(crate) fn spawn(self, runtime: &Handle) {
        runtime.spawn(self.run());
    }

    async fn run(self) {
        let SocketDriver {
            socket,
            stream,
            mut outbound,
            mut close_rx,
            _permit,
        } = self;
        let (mut reader, mut writer) = stream.into_split();
        let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

        // Queued writes go out before a pending close is honored, but a write
        // the peer is not draining never holds the close back.
        let cause = loop {
            tokio::select! {
                biased;

                Some(data) = outbound.recv() => {
                    tokio::select! {
                        biased;

                        written = writer.write_all(&data) => {
                            if let Err(e) = written {
                                break CloseCause::Failed(e);
                            }
                        }
                        _ = closed(&mut close_rx) => break CloseCause::Local,
                    }
                }
                _ = closed(&mut close_rx) => break CloseCause::Local,
                read = reader.read_buf(&mut buf) => match read {
                    Ok(0) => break CloseCause::Remote,
                    Ok(_) => {
                        let chunk = buf.split().freeze();
                        if socket.state() == SocketState::Open {
                            socket.deliver(SocketEvent::Data(chunk));
                        }
                        buf.reserve(READ_BUFFER_SIZE);
                    }
                    Err(e) => break CloseCause::Failed(e),
                },
            }
        };

        if let Err(e) = writer.shutdown().await {
            tracing::trace!(socket_id = %socket.id(), error = %e, "Stream shutdown failed");
        }

        match &cause {
            CloseCause::Local => {}
            CloseCause::Remote => {
                tracing::debug!(
                    socket_id = %socket.id(),
                    peer_addr = %socket.remote_addr(),
                    "Peer closed connection"
                );
            }
            CloseCause::Failed(e) => {
                tracing::debug!(
                    socket_id = %socket.id(),
                    peer_addr = %socket.remote_addr(),
                    error = %e,
                    "Connection failed"
                );
            }
        }
        socket.transition_closed();
    }
}

/// Resolve once the close flag is set (or its sender is gone).
async fn closed(close_rx: &mut watch::Receiver<bool>) {
    // The `Ref` from `wait_for` must not outlive this future: it holds a
    // non-`Send` read guard.
    let _ = close_rx.wait_for(|closed| *closed).await;
}
