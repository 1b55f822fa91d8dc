//! Event notification subsystem.
//!
//! # Data Flow
//! ```text
//! transport task (accept loop, socket driver, connect attempt)
//!     → dispatch.rs (queue a delivery on the endpoint's event loop)
//!     → notifier.rs (run every listener for the event kind, in order)
//!     → caller callbacks
//! ```
//!
//! # Design Decisions
//! - One notifier per object (endpoint or socket), no global bus
//! - All deliveries for an endpoint and its sockets run on one task
//! - Listener panics are contained and logged

pub mod dispatch;
pub mod notifier;

pub use dispatch::Dispatcher;
pub use notifier::{Event, EventNotifier, ListenerId};
