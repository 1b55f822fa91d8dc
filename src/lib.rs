//! Connection-lifecycle core for EmiNet endpoints.
//!
//! An [`Endpoint`] either listens for inbound connections, dials out, or both.
//! Every established connection is a [`Socket`] with a close-once lifecycle.
//! Lifecycle changes are delivered as events to listeners registered with
//! `on(..)`.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use eminet::{open, EndpointConfig};
//!
//! let server = open(EndpointConfig::listen(5001))?;
//! server.on_connection(|socket| {
//!     socket.on_disconnect(|| println!("client disconnected"));
//! });
//!
//! let client = open(EndpointConfig::client())?;
//! client.connect("127.0.0.1", 5001, |result| match result {
//!     Ok(socket) => socket.close(),
//!     Err(e) => eprintln!("failed to connect: {e}"),
//! });
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod event;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::EndpointConfig;
pub use event::ListenerId;
pub use net::{
    open, ConnectError, Endpoint, EndpointError, EndpointEvent, EndpointEventKind, OpenError,
    Socket, SocketError, SocketEvent, SocketEventKind, SocketId, SocketState,
    OUTBOUND_QUEUE_CAPACITY,
};
