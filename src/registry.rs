//! Active-connection registry (supports component F).
//!
//! Holds one cancellation handle per live connection, keyed by an opaque
//! id. The supervisor is the only reader; per-connection code only ever
//! registers itself on entry and deregisters on exit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

/// Tracks every in-flight connection's cancellation token.
pub struct Registry {
    next_id: AtomicU64,
    connections: Mutex<HashMap<u64, CancellationToken>>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry {
            next_id: AtomicU64::new(1),
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Allocates a fresh connection id and registers its cancellation token.
    pub fn register(&self, cancel: CancellationToken) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections.lock().unwrap().insert(id, cancel);
        id
    }

    pub fn deregister(&self, id: u64) {
        self.connections.lock().unwrap().remove(&id);
    }

    /// Cancels every currently-registered connection. Used only by the
    /// supervisor during shutdown.
    pub fn cancel_all(&self) {
        let connections = self.connections.lock().unwrap();
        for cancel in connections.values() {
            cancel.cancel();
        }
    }

    pub fn len(&self) -> usize {
        self.connections.lock().unwrap().len()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_deregister_tracks_count() {
        let reg = Registry::new();
        let id = reg.register(CancellationToken::new());
        assert_eq!(reg.len(), 1);
        reg.deregister(id);
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn cancel_all_cancels_every_registered_token() {
        let reg = Registry::new();
        let t1 = CancellationToken::new();
        let t2 = CancellationToken::new();
        reg.register(t1.clone());
        reg.register(t2.clone());
        reg.cancel_all();
        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
    }
}
