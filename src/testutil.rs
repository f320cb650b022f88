//! Synchronization helpers for tests that observe background work.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Counts calls made on one thread and lets other threads block until the
/// count reaches an expected value.
///
/// Production code increments it through an `Option<Arc<CallCounter>>` that
/// is only populated by test constructors.
#[derive(Debug, Default)]
pub struct CallCounter {
    count: Mutex<usize>,
    cond: Condvar,
}

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the counter and wake every waiter.
    pub fn incr(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count += 1;
        drop(count);
        self.cond.notify_all();
    }

    /// Current number of recorded calls.
    pub fn count(&self) -> usize {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until at least `expected` calls have been recorded.
    pub fn wait(&self, expected: usize) {
        let count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        let _count = self
            .cond
            .wait_while(count, |n| *n < expected)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Like [`CallCounter::wait`] but gives up after `timeout`.
    ///
    /// Returns `true` if the expected count was reached.
    pub fn wait_timeout(&self, expected: usize, timeout: Duration) -> bool {
        let count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        let (count, _) = self
            .cond
            .wait_timeout_while(count, timeout, |n| *n < expected)
            .unwrap_or_else(PoisonError::into_inner);
        *count >= expected
    }
}
