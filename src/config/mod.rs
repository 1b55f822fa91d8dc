//! Endpoint configuration.
//!
//! # Data Flow
//! ```text
//! config file (TOML) or code
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → EndpointConfig (validated, immutable)
//!     → open() (validates again before any socket is bound)
//! ```
//!
//! # Design Decisions
//! - All fields have defaults; an empty config is a pure client endpoint
//! - Validation separates syntactic (serde) from semantic checks
//! - Validation reports every problem, not just the first

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::EndpointConfig;
pub use validation::{validate_config, ValidationError};
