//! Connection pool with bounded concurrency

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Interval between checks while draining
const DRAIN_POLL_MS: u64 = 10;

/// Pool that enforces a maximum number of concurrent connections
#[derive(Clone)]
pub struct ConnectionPool {
    semaphore: Arc<Semaphore>,
    active_count: Arc<AtomicUsize>,
    max_connections: usize,
}

impl ConnectionPool {
    /// Create a new connection pool
    ///
    /// # Panics
    ///
    /// Panics if `max_connections` is 0
    #[must_use]
    pub fn new(max_connections: usize) -> Self {
        assert!(max_connections > 0, "max_connections must be > 0");

        Self {
            semaphore: Arc::new(Semaphore::new(max_connections)),
            active_count: Arc::new(AtomicUsize::new(0)),
            max_connections,
        }
    }

    /// Try to acquire a connection permit
    ///
    /// Returns `None` if the pool is full
    pub fn try_acquire(&self) -> Option<ConnectionGuard> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        Some(self.guard(permit))
    }

    fn guard(&self, permit: OwnedSemaphorePermit) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard {
            _permit: permit,
            active_count: Arc::clone(&self.active_count),
        }
    }

    /// Current number of active connections
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }

    /// Maximum number of connections
    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Wait until every guard is dropped or `timeout` elapses
    ///
    /// Returns `true` if the pool drained in time.
    pub async fn drain(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            while self.active_connections() > 0 {
                tokio::time::sleep(Duration::from_millis(DRAIN_POLL_MS)).await;
            }
        })
        .await
        .is_ok()
    }
}

/// Guard that releases a connection permit when dropped
pub struct ConnectionGuard {
    _permit: OwnedSemaphorePermit,
    active_count: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::Relaxed);
    }
}
