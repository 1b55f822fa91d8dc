//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Reject listening endpoints without a port
//! - Validate value ranges (limits and timeouts > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: EndpointConfig → Result<(), Vec<ValidationError>>

use thiserror::Error;

use crate::config::schema::EndpointConfig;

/// A single semantic problem with an [`EndpointConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("accept_connections is set but no port was given")]
    MissingPort,

    #[error("max_connections must be greater than zero")]
    ZeroMaxConnections,

    #[error("connect_timeout_ms must be greater than zero when set")]
    ZeroConnectTimeout,
}

/// Check `config`, collecting every problem found.
pub fn validate_config(config: &EndpointConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.accept_connections && config.port.is_none() {
        errors.push(ValidationError::MissingPort);
    }
    if config.max_connections == 0 {
        errors.push(ValidationError::ZeroMaxConnections);
    }
    if config.connect_timeout_ms == Some(0) {
        errors.push(ValidationError::ZeroConnectTimeout);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_is_valid() {
        assert!(validate_config(&EndpointConfig::client()).is_ok());
    }

    #[test]
    fn port_without_listening_is_ignored() {
        let config = EndpointConfig {
            port: Some(9000),
            ..EndpointConfig::default()
        };
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn reports_every_error() {
        let config = EndpointConfig {
            accept_connections: true,
            port: None,
            max_connections: 0,
            connect_timeout_ms: Some(0),
            ..EndpointConfig::default()
        };
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::MissingPort,
                ValidationError::ZeroMaxConnections,
                ValidationError::ZeroConnectTimeout,
            ]
        );
    }
}
