//! Bounded worker pool with runtime-adjustable capacity.
//!
//! Capacity limits concurrent conversions via a semaphore. Raising capacity
//! adds permits immediately; lowering retires permits as running jobs
//! release them, so in-flight work is never preempted.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Semaphore-backed pool bounding concurrent conversion jobs.
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    capacity: Mutex<usize>,
}

impl WorkerPool {
    /// Create a pool with the given capacity. A capacity of zero is
    /// clamped to one; the pool must always be able to make progress.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity: Mutex::new(capacity),
        }
    }

    /// Current configured capacity.
    pub fn capacity(&self) -> usize {
        *self.capacity.lock()
    }

    /// Permits currently available for dispatch.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a slot. The returned permit is held for the duration of a
    /// conversion and released on drop.
    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        self.semaphore
            .clone()
            .acquire_many_owned(1)
            .await
            .expect("semaphore should not be closed")
    }

    /// Try to claim a slot without waiting.
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.semaphore.clone().try_acquire_many_owned(1).ok()
    }

    /// Adjust capacity at runtime. Zero is clamped to one.
    ///
    /// Raises take effect immediately. Lowers retire the excess permits as
    /// they are released, so running jobs always complete.
    pub fn set_capacity(&self, new_capacity: usize) {
        let new_capacity = new_capacity.max(1);
        let mut capacity = self.capacity.lock();
        let old = *capacity;
        if new_capacity == old {
            return;
        }
        *capacity = new_capacity;
        debug!(old, new = new_capacity, "pool capacity changed");

        if new_capacity > old {
            self.semaphore.add_permits(new_capacity - old);
        } else {
            // Retire free permits synchronously; any remainder is swallowed
            // as running jobs release theirs.
            let mut remaining = (old - new_capacity) as u32;
            while remaining > 0 {
                match self.semaphore.clone().try_acquire_owned() {
                    Ok(permit) => {
                        permit.forget();
                        remaining -= 1;
                    }
                    Err(_) => break,
                }
            }
            if remaining > 0 {
                let semaphore = self.semaphore.clone();
                tokio::spawn(async move {
                    if let Ok(permits) = semaphore.acquire_many_owned(remaining).await {
                        permits.forget();
                    }
                });
            }
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("capacity", &self.capacity())
            .field("available_permits", &self.available_permits())
            .finish()
    }
}
