//! Execution counter

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter of executions stored in history. Starts at 1 and never
/// goes backwards.
#[derive(Debug)]
pub struct ExecutionCounter {
    next: AtomicU64,
}

impl Default for ExecutionCounter {
    fn default() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }
}

impl ExecutionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value the next execution will be reported under
    pub fn current(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }

    /// Return the current value, advancing the counter only if the execution
    /// is stored in history
    pub fn claim(&self, store_history: bool) -> u64 {
        if store_history {
            self.next.fetch_add(1, Ordering::SeqCst)
        } else {
            self.current()
        }
    }
}
