//! Error types for endpoints and sockets.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

use crate::config::ValidationError;

/// Failure returned synchronously by [`crate::open`].
#[derive(Debug, Error)]
pub enum OpenError {
    /// The configuration failed semantic validation.
    #[error("invalid endpoint configuration: {}", join(.0))]
    Config(Vec<ValidationError>),

    /// `open` was called outside a Tokio runtime.
    #[error("endpoint must be opened from within a Tokio runtime")]
    NoRuntime,
}

fn join(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Failure delivered through an endpoint's `error` event.
#[derive(Debug, Error)]
pub enum EndpointError {
    /// The listening socket could not be bound.
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Failure of a single outbound connection attempt.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The host name did not resolve to any address.
    #[error("could not resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// The transport refused or failed the attempt.
    #[error("failed to connect to {host}:{port}: {source}")]
    Io {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// The attempt did not resolve within the configured connect timeout.
    #[error("connect to {host}:{port} timed out after {}ms", .timeout.as_millis())]
    Timeout {
        host: String,
        port: u16,
        timeout: Duration,
    },

    /// The endpoint was closed before or during the attempt.
    #[error("endpoint is closed")]
    Closed,
}

impl ConnectError {
    /// Underlying I/O error kind, where there is one.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            ConnectError::Resolve { source, .. } | ConnectError::Io { source, .. } => {
                Some(source.kind())
            }
            ConnectError::Timeout { .. } => Some(io::ErrorKind::TimedOut),
            ConnectError::Closed => None,
        }
    }
}

/// Failure of an operation on an established socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SocketError {
    #[error("socket is closed")]
    Closed,

    /// The outbound queue is full; the peer is not draining what was sent.
    #[error("socket send queue is full")]
    QueueFull,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_lists_every_problem() {
        let err = OpenError::Config(vec![
            ValidationError::MissingPort,
            ValidationError::ZeroMaxConnections,
        ]);
        assert_eq!(
            err.to_string(),
            "invalid endpoint configuration: accept_connections is set but no port was given, \
             max_connections must be greater than zero"
        );
    }

    #[test]
    fn connect_error_kinds() {
        let refused = ConnectError::Io {
            host: "127.0.0.1".into(),
            port: 1,
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert_eq!(refused.io_kind(), Some(io::ErrorKind::ConnectionRefused));

        let timeout = ConnectError::Timeout {
            host: "10.255.255.1".into(),
            port: 80,
            timeout: Duration::from_millis(50),
        };
        assert_eq!(timeout.to_string(), "connect to 10.255.255.1:80 timed out after 50ms");
        assert_eq!(ConnectError::Closed.io_kind(), None);
    }
}
