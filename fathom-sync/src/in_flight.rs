//! In-flight write tracker.
//!
//! At most one background write per identity. The set is touched from the
//! host thread (claim) and from worker threads (release), always under one
//! mutex.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fathom_core::AssetIdentity;

#[derive(Debug, Default)]
pub struct InFlightTracker {
    inner: Mutex<HashSet<AssetIdentity>>,
}

impl InFlightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<AssetIdentity>> {
        // A panicking writer cannot leave the set half-updated.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `identity`; `false` if it was already in flight.
    pub fn try_begin(&self, identity: &AssetIdentity) -> bool {
        self.lock().insert(identity.clone())
    }

    pub fn end(&self, identity: &AssetIdentity) {
        self.lock().remove(identity);
    }

    /// [`try_begin`](Self::try_begin) returning a guard that ends the claim on drop.
    pub fn claim(self: &Arc<Self>, identity: &AssetIdentity) -> Option<InFlightGuard> {
        if self.try_begin(identity) {
            Some(InFlightGuard {
                tracker: Arc::clone(self),
                identity: identity.clone(),
            })
        } else {
            None
        }
    }

    pub fn contains(&self, identity: &AssetIdentity) -> bool {
        self.lock().contains(identity)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Releases its identity exactly once, when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    tracker: Arc<InFlightTracker>,
    identity: AssetIdentity,
}

impl InFlightGuard {
    pub fn identity(&self) -> &AssetIdentity {
        &self.identity
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.tracker.end(&self.identity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_try_begin_is_rejected_until_end() {
        let tracker = InFlightTracker::new();
        let a = AssetIdentity::from("A");
        assert!(tracker.try_begin(&a));
        assert!(!tracker.try_begin(&a));
        tracker.end(&a);
        assert!(tracker.try_begin(&a));
    }

    #[test]
    fn guard_releases_on_drop() {
        let tracker = Arc::new(InFlightTracker::new());
        let a = AssetIdentity::from("/Game/BP_A");
        let guard = tracker.claim(&a).expect("first claim");
        assert!(tracker.claim(&a).is_none());
        assert_eq!(tracker.len(), 1);
        drop(guard);
        assert!(tracker.is_empty());
    }

    #[test]
    fn guard_releases_when_holder_panics() {
        let tracker = Arc::new(InFlightTracker::new());
        let a = AssetIdentity::from("/Game/BP_A");
        let guard = tracker.claim(&a).expect("claim");
        let result = std::thread::spawn(move || {
            let _guard = guard;
            panic!("writer failed");
        })
        .join();
        assert!(result.is_err());
        assert!(!tracker.contains(&a));
    }
}
