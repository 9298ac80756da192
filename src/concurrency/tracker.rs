//! Counts batches between flush and terminal disposition.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

#[derive(Debug)]
struct TrackerInner {
    pending: AtomicUsize,
    idle: Notify,
}

/// Tracks how many batches have been flushed but not yet reached a terminal
/// disposition.
///
/// Every flushed batch is tracked once and completed exactly once, when all of
/// its rows are either delivered or reported as failed. Shutdown uses
/// [`PendingTracker::wait_idle`] to bound the drain phase.
#[derive(Debug, Clone)]
pub struct PendingTracker {
    inner: Arc<TrackerInner>,
}

impl PendingTracker {
    /// Creates a tracker with no pending work.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                pending: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// Registers one batch as pending.
    pub fn track(&self) {
        self.inner.pending.fetch_add(1, Ordering::SeqCst);
    }

    /// Marks one pending batch as terminal.
    pub fn complete(&self) {
        if self.inner.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_one();
        }
    }

    /// Returns the number of batches currently pending.
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Waits until no batch is pending.
    ///
    /// Relies on `notify_one` storing a permit when no waiter is registered, so
    /// a completion racing with this call is never missed.
    pub async fn wait_idle(&self) {
        loop {
            if self.pending() == 0 {
                return;
            }
            self.inner.idle.notified().await;
        }
    }
}

impl Default for PendingTracker {
    fn default() -> Self {
        Self::new()
    }
}
