use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounded task executor: at most `capacity` units of work run at once.
///
/// Waiters park on the semaphore's queue (FIFO in tokio) instead of polling,
/// so a freed slot is handed to the longest waiter immediately. Clones share
/// the same slots; every entry point that creates pipeline work must use one
/// shared instance.
#[derive(Clone, Debug)]
pub struct TaskLimiter {
    semaphore: Arc<Semaphore>,
    running: Arc<AtomicUsize>,
    capacity: usize,
}

/// A held slot. Dropping it releases the slot exactly once, including when
/// the unit of work fails or panics.
#[must_use = "the slot is released when SlotGuard is dropped"]
#[derive(Debug)]
pub struct SlotGuard {
    _permit: OwnedSemaphorePermit,
    running: Arc<AtomicUsize>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

impl TaskLimiter {
    /// Panics if `capacity` is zero; config validation rejects that earlier.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "TaskLimiter capacity must be >= 1");
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            running: Arc::new(AtomicUsize::new(0)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Units of work currently holding a slot.
    pub fn running_count(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> SlotGuard {
        // The semaphore is never closed, so acquisition only fails if that changes.
        let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => unreachable!("TaskLimiter semaphore closed"),
        };
        self.running.fetch_add(1, Ordering::SeqCst);
        SlotGuard {
            _permit: permit,
            running: Arc::clone(&self.running),
        }
    }

    /// Run `work` once a slot is free and return its output.
    pub async fn run<F, T>(&self, work: F) -> T
    where
        F: Future<Output = T>,
    {
        let _slot = self.acquire().await;
        work.await
    }
}
