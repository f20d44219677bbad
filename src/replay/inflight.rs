//! Per-fingerprint serialization of upstream fetches

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Map of fingerprints with a fetch in progress
#[derive(Debug, Default)]
pub struct InFlight {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl InFlight {
    /// Create an empty map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other caller holds `fingerprint`, then hold it
    pub async fn acquire(&self, fingerprint: &str) -> InFlightGuard<'_> {
        let lock = self
            .locks
            .entry(fingerprint.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = lock.lock_owned().await;

        InFlightGuard {
            owner: self,
            fingerprint: fingerprint.to_string(),
            _guard: guard,
        }
    }

    /// Number of fingerprints currently held or awaited
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no fetch is in progress
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive hold on one fingerprint, released on drop
pub struct InFlightGuard<'a> {
    owner: &'a InFlight,
    fingerprint: String,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        // Map entry plus our own guard; anything beyond that is a waiter.
        self.owner
            .locks
            .remove_if(&self.fingerprint, |_, lock| Arc::strong_count(lock) <= 2);
    }
}
