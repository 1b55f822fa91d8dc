//! Socket identity and ownership tracking.
//!
//! # Responsibilities
//! - Generate unique socket IDs for tracing
//! - Track the live sockets an endpoint owns
//! - Hand every live socket back on endpoint teardown

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::net::socket::Socket;

/// Global atomic counter for socket IDs.
/// Relaxed ordering is enough: only uniqueness is needed.
static SOCKET_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(u64);

impl SocketId {
    /// Generate a new unique socket ID.
    pub fn new() -> Self {
        Self(SOCKET_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for SocketId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SocketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sock-{}", self.0)
    }
}

/// Live sockets owned by one endpoint.
///
/// Sockets insert themselves once open and remove themselves when they close.
#[derive(Debug, Default)]
pub struct SocketRegistry {
    sockets: Mutex<HashMap<SocketId, Socket>>,
}

impl SocketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, socket: Socket) {
        self.lock().insert(socket.id(), socket);
    }

    pub fn remove(&self, id: SocketId) -> Option<Socket> {
        self.lock().remove(&id)
    }

    /// Number of live sockets.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Take every socket out of the registry, ordered by ID.
    pub fn drain(&self) -> Vec<Socket> {
        let mut sockets: Vec<Socket> = self.lock().drain().map(|(_, socket)| socket).collect();
        sockets.sort_by_key(Socket::id);
        sockets
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SocketId, Socket>> {
        self.sockets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_id_unique() {
        let id1 = SocketId::new();
        let id2 = SocketId::new();
        assert_ne!(id1, id2);
        assert!(id2 > id1);
    }

    #[test]
    fn socket_id_display() {
        let id = SocketId::new();
        assert_eq!(id.to_string(), format!("sock-{}", id.as_u64()));
    }

    #[test]
    fn empty_registry() {
        let registry = SocketRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(registry.remove(SocketId::new()).is_none());
        assert!(registry.drain().is_empty());
    }
}
