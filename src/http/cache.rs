//! Per-address transport and connection caches.
//!
//! One mutex guards both maps so the single-flight reconcile step sees a
//! consistent view. Every method only touches the maps; callers must never
//! perform network I/O, await, or drop live connections while a method of
//! this type is running, and nothing here holds the lock past return.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Outcome of [`AddressCache::reconcile`].
#[derive(Debug)]
pub enum Reconciled<C> {
    /// Another caller cached a connection first. `winner` was taken from
    /// the cache for this caller; `loser` is the caller's own connection
    /// and must be closed.
    Adopted { winner: C, loser: C },
    /// A transport already exists; the caller keeps its connection.
    Standby(C),
    /// The caller built the transport; its connection is now cached.
    Built,
}

struct Inner<T, C> {
    transports: HashMap<String, T>,
    connections: HashMap<String, C>,
}

/// Address keyed caches for negotiated transports and handshaked
/// connections awaiting adoption.
pub struct AddressCache<T, C> {
    inner: Mutex<Inner<T, C>>,
}

impl<T: Clone, C> Default for AddressCache<T, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone, C> AddressCache<T, C> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                transports: HashMap::new(),
                connections: HashMap::new(),
            }),
        }
    }

    // A panic elsewhere never leaves an address permanently un-cacheable.
    fn lock(&self) -> MutexGuard<'_, Inner<T, C>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn transport(&self, addr: &str) -> Option<T> {
        self.lock().transports.get(addr).cloned()
    }

    pub fn has_transport(&self, addr: &str) -> bool {
        self.lock().transports.contains_key(addr)
    }

    /// Installs `transport` unless one already exists; returns the cached one.
    pub fn insert_transport_if_absent(&self, addr: &str, transport: T) -> T {
        self.lock()
            .transports
            .entry(addr.to_string())
            .or_insert(transport)
            .clone()
    }

    /// Removes and returns the connection cached for `addr`.
    pub fn take_connection(&self, addr: &str) -> Option<C> {
        self.lock().connections.remove(addr)
    }

    /// Caches `conn` for `addr` unless one is already cached, in which case
    /// `conn` is handed back for the caller to close.
    pub fn stash(&self, addr: &str, conn: C) -> Option<C> {
        let mut inner = self.lock();
        if inner.connections.contains_key(addr) {
            return Some(conn);
        }
        inner.connections.insert(addr.to_string(), conn);
        None
    }

    /// Settles a freshly handshaked `conn` for `addr`.
    ///
    /// `build` runs under the lock and must not perform I/O.
    pub fn reconcile(&self, addr: &str, conn: C, build: impl FnOnce(&C) -> T) -> Reconciled<C> {
        let mut inner = self.lock();
        if let Some(winner) = inner.connections.remove(addr) {
            return Reconciled::Adopted {
                winner,
                loser: conn,
            };
        }
        if inner.transports.contains_key(addr) {
            return Reconciled::Standby(conn);
        }
        let transport = build(&conn);
        inner.transports.insert(addr.to_string(), transport);
        inner.connections.insert(addr.to_string(), conn);
        Reconciled::Built
    }

    /// Removes every cached connection and returns them for closing.
    pub fn drain_connections(&self) -> Vec<(String, C)> {
        self.lock().connections.drain().collect()
    }

    pub fn transports(&self) -> Vec<(String, T)> {
        self.lock()
            .transports
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn transport_count(&self) -> usize {
        self.lock().transports.len()
    }

    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    type Cache = AddressCache<&'static str, u32>;

    #[test]
    fn test_first_handshake_builds() {
        let cache = Cache::new();
        let outcome = cache.reconcile("a:443", 1, |_| "h2");
        assert!(matches!(outcome, Reconciled::Built));
        assert_eq!(cache.transport("a:443"), Some("h2"));
        assert_eq!(cache.connection_count(), 1);
    }

    #[test]
    fn test_loser_adopts_winner() {
        let cache = Cache::new();
        cache.reconcile("a:443", 1, |_| "h2");
        match cache.reconcile("a:443", 2, |_| unreachable!()) {
            Reconciled::Adopted { winner, loser } => {
                assert_eq!(winner, 1);
                assert_eq!(loser, 2);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(cache.connection_count(), 0);
        assert_eq!(cache.transport_count(), 1);
    }

    #[test]
    fn test_standby_when_transport_exists() {
        let cache = Cache::new();
        cache.reconcile("a:443", 1, |_| "h1");
        assert_eq!(cache.take_connection("a:443"), Some(1));
        let outcome = cache.reconcile("a:443", 2, |_| unreachable!());
        assert!(matches!(outcome, Reconciled::Standby(2)));
        assert_eq!(cache.stash("a:443", 2), None);
        assert_eq!(cache.stash("a:443", 3), Some(3));
    }

    #[test]
    fn test_drain_keeps_transports() {
        let cache = Cache::new();
        cache.reconcile("a:443", 1, |_| "h2");
        cache.reconcile("b:443", 2, |_| "h1");
        let drained = cache.drain_connections();
        assert_eq!(drained.len(), 2);
        assert_eq!(cache.connection_count(), 0);
        assert_eq!(cache.transport_count(), 2);
        assert!(cache.has_transport("b:443"));
    }

    #[test]
    fn test_insert_transport_if_absent() {
        let cache = Cache::new();
        assert_eq!(cache.insert_transport_if_absent("a:80", "plain"), "plain");
        assert_eq!(cache.insert_transport_if_absent("a:80", "other"), "plain");
    }

    #[test]
    fn test_concurrent_reconcile_builds_once() {
        let cache = Arc::new(Cache::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    matches!(cache.reconcile("a:443", i, |_| "h2"), Reconciled::Built)
                })
            })
            .collect();
        let built = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|b| *b)
            .count();
        assert_eq!(built, 1);
        assert_eq!(cache.transport_count(), 1);
    }
}
