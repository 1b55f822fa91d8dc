//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound:
//!     listener.rs (bind, accept loop, connection limits)
//!     → endpoint.rs (adopt stream, emit `connection`)
//!     → socket.rs (driver task, `data` / `disconnect`)
//!
//! Outbound:
//!     endpoint.rs connect (resolve, single attempt, optional timeout)
//!     → socket.rs (driver task)
//!     → connect callback on the endpoint's dispatcher
//!
//! Socket States:
//!     Connecting → Open → Closed
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each socket is owned by the endpoint that produced it
//! - Failures after establishment surface only as `disconnect`

pub mod connection;
pub mod endpoint;
pub mod error;
pub mod listener;
pub mod socket;

pub use connection::SocketId;
pub use endpoint::{open, Endpoint, EndpointEvent, EndpointEventKind};
pub use error::{ConnectError, EndpointError, OpenError, SocketError};
pub use socket::{Socket, SocketEvent, SocketEventKind, SocketState, OUTBOUND_QUEUE_CAPACITY};
