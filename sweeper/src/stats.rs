use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Statistics for the passes run by a Sweeper
#[derive(Debug, Default)]
pub(crate) struct SweeperStats {
    /// Counter for how many passes have run
    run_counter: AtomicUsize,
    /// Counter for how many passes returned an error
    failure_counter: AtomicUsize,
    /// Total number of records removed across all passes
    removed_counter: AtomicU64,
}

impl SweeperStats {
    /// Gets the number of passes that have run
    pub(crate) fn run_counter(&self) -> usize {
        self.run_counter.load(Ordering::Relaxed)
    }

    /// Gets the number of passes that returned an error
    pub(crate) fn failure_counter(&self) -> usize {
        self.failure_counter.load(Ordering::Relaxed)
    }

    /// Gets the total number of records removed across all passes
    pub(crate) fn removed_counter(&self) -> u64 {
        self.removed_counter.load(Ordering::Relaxed)
    }

    /// Increments the run counter and returns the previous value
    pub(crate) fn increment_run_counter(&self) -> usize {
        self.run_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Increments the failure counter
    pub(crate) fn increment_failure_counter(&self) {
        self.failure_counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds to the removed-records counter
    pub(crate) fn add_removed(&self, removed: u64) {
        self.removed_counter.fetch_add(removed, Ordering::Relaxed);
    }
}
