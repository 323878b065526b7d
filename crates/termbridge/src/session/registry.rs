//! Session registry.
//!
//! Maps session indices to live PTY handles. Indices are issued
//! monotonically from zero and never reused within one manager instance, so
//! a stale caller can never accidentally target a resurrected session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use super::pty::PtyHandle;

/// Unique identifier for a session within one manager instance.
pub type SessionIndex = u64;

/// Concurrent index-to-handle map with a monotone index allocator.
///
/// DashMap keeps registry access from serializing independent sessions
/// against each other; the manager is the sole owner of this structure.
pub struct SessionRegistry {
    sessions: DashMap<SessionIndex, Arc<PtyHandle>>,
    next_index: AtomicU64,
}

impl SessionRegistry {
    /// Creates an empty registry; the first allocated index is 0.
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_index: AtomicU64::new(0),
        }
    }

    /// Issues the next session index. Indices are never reused, even after
    /// the session they named has been destroyed.
    pub fn allocate(&self) -> SessionIndex {
        self.next_index.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a handle under its index.
    pub fn insert(&self, index: SessionIndex, handle: Arc<PtyHandle>) {
        self.sessions.insert(index, handle);
    }

    /// Looks up the handle for an index.
    pub fn get(&self, index: SessionIndex) -> Option<Arc<PtyHandle>> {
        self.sessions.get(&index).map(|entry| Arc::clone(entry.value()))
    }

    /// Removes and returns the handle for an index, if present. The index
    /// is gone for good; it will not be reassigned.
    pub fn remove(&self, index: SessionIndex) -> Option<Arc<PtyHandle>> {
        self.sessions.remove(&index).map(|(_, handle)| handle)
    }

    /// Returns true if the index currently refers to a registered session.
    pub fn contains(&self, index: SessionIndex) -> bool {
        self.sessions.contains_key(&index)
    }

    /// Indices of all registered sessions, in no particular order.
    pub fn indices(&self) -> Vec<SessionIndex> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if no sessions are registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_is_monotone() {
        let registry = SessionRegistry::new();
        let a = registry.allocate();
        let b = registry.allocate();
        let c = registry.allocate();
        assert_eq!((a, b, c), (0, 1, 2));
    }

    #[test]
    fn test_removed_index_is_not_reissued() {
        let registry = SessionRegistry::new();
        let first = registry.allocate();
        assert!(registry.remove(first).is_none()); // never inserted

        // Allocation keeps counting regardless of removals.
        assert_eq!(registry.allocate(), first + 1);
    }
}
