//! Bookkeeping of handles created and not yet released.

use std::collections::HashSet;

use parking_lot::Mutex;

use crate::domain::handle::RemoteHandle;
use crate::infrastructure::metrics;

/// Handles this client owns on the engine.
///
/// The lock is never held across a suspension point: every method mutates
/// and returns before the caller awaits anything.
#[derive(Debug, Default)]
pub struct ActiveHandleSet {
    inner: Mutex<HashSet<RemoteHandle>>,
}

impl ActiveHandleSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a handle. Returns `false` if it was already tracked.
    pub fn insert(&self, handle: RemoteHandle) -> bool {
        let mut set = self.inner.lock();
        let added = set.insert(handle);
        metrics::set_active_handles(set.len());
        added
    }

    /// Stop tracking a handle. Returns `false` if it was not tracked, so
    /// exactly one caller ever wins the right to release it.
    pub fn remove(&self, handle: &RemoteHandle) -> bool {
        let mut set = self.inner.lock();
        let removed = set.remove(handle);
        metrics::set_active_handles(set.len());
        removed
    }

    /// Whether a handle is tracked.
    #[must_use]
    pub fn contains(&self, handle: &RemoteHandle) -> bool {
        self.inner.lock().contains(handle)
    }

    /// Number of tracked handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Copy of the tracked handles, sorted.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RemoteHandle> {
        let mut handles: Vec<_> = self.inner.lock().iter().cloned().collect();
        handles.sort();
        handles
    }

    /// Take every tracked handle, leaving the set empty.
    pub fn drain(&self) -> Vec<RemoteHandle> {
        let mut set = self.inner.lock();
        let handles: Vec<_> = set.drain().collect();
        metrics::set_active_handles(0);
        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_wins_once() {
        let set = ActiveHandleSet::new();
        let h = RemoteHandle::new("h1");
        assert!(set.insert(h.clone()));
        assert!(!set.insert(h.clone()));
        assert!(set.remove(&h));
        assert!(!set.remove(&h));
        assert!(set.is_empty());
    }

    #[test]
    fn drain_empties_the_set() {
        let set = ActiveHandleSet::new();
        set.insert("b".into());
        set.insert("a".into());
        assert_eq!(set.snapshot(), vec![RemoteHandle::new("a"), RemoteHandle::new("b")]);

        let mut drained = set.drain();
        drained.sort();
        assert_eq!(drained.len(), 2);
        assert!(set.is_empty());
        assert!(set.drain().is_empty());
    }
}
