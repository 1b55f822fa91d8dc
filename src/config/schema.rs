//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Options recognized by [`crate::open`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Bind and listen for inbound connections.
    #[serde(alias = "acceptConnections")]
    pub accept_connections: bool,

    /// Port to listen on. Required when accepting; `0` picks an ephemeral port.
    /// Ignored by client-only endpoints.
    pub port: Option<u16>,

    /// Local address to bind when accepting (default: all interfaces).
    pub address: IpAddr,

    /// Maximum concurrent inbound sockets (backpressure).
    pub max_connections: usize,

    /// Upper bound on a single outbound connect attempt, in milliseconds.
    /// `None` leaves the attempt to the OS.
    pub connect_timeout_ms: Option<u64>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            accept_connections: false,
            port: None,
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            max_connections: 10_000,
            connect_timeout_ms: None,
        }
    }
}

impl EndpointConfig {
    /// Config for an endpoint that only dials out.
    pub fn client() -> Self {
        Self::default()
    }

    /// Config for an endpoint accepting connections on `port`.
    pub fn listen(port: u16) -> Self {
        Self {
            accept_connections: true,
            port: Some(port),
            ..Self::default()
        }
    }

    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.address = address;
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = Some(timeout.as_millis().try_into().unwrap_or(u64::MAX));
        self
    }

    /// Connect timeout as a `Duration`, if configured.
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}
