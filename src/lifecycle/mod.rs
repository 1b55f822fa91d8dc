//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Endpoint::close() → trigger → accept loop stops → sockets closed
//!
//! Signals (signals.rs):
//!     SIGINT → demo binary tears down its endpoints
//! ```
//!
//! # Design Decisions
//! - Teardown is idempotent: the first trigger wins
//! - Dropping the coordinator also releases every subscriber

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
