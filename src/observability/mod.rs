//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! net (listener, endpoint, socket) and event subsystems produce:
//!     → tracing events with socket_id / peer_addr fields
//!     → logging.rs (subscriber installed by the binary or tests)
//! ```
//!
//! # Design Decisions
//! - The library only emits events; installing a subscriber is the caller's job
//! - Lifecycle transitions log at debug, failures at warn/error

pub mod logging;

pub use logging::init_logging;
