//! Structured logging setup.
//!
//! # Design Decisions
//! - Uses tracing-subscriber's registry with an env filter and fmt layer
//! - `RUST_LOG` wins over the built-in default filter
//! - Safe to call more than once (later calls are ignored)

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "eminet=info";

/// Install the global subscriber.
///
/// Returns false if a global subscriber was already set.
pub fn init_logging(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
