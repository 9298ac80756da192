//! Delivery of terminal insert failures to the pipeline owner.
//!
//! Failures land in a bounded queue the caller drains with
//! [`ErrorReporter::recv`]. When the owner does not keep up, the oldest
//! failure is dropped to make room for the newest one and the drop is counted,
//! so a slow consumer degrades observability instead of stalling the workers.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, Notify};
use tracing::warn;

use crate::types::InsertFailure;

#[derive(Debug)]
struct ReporterInner {
    queue: Mutex<VecDeque<InsertFailure>>,
    capacity: usize,
    available: Notify,
    dropped: AtomicU64,
}

/// Bounded queue of terminal insert failures.
///
/// Cloning is cheap and every clone drains the same queue.
#[derive(Debug, Clone)]
pub struct ErrorReporter {
    inner: Arc<ReporterInner>,
}

impl ErrorReporter {
    /// Creates a reporter holding at most `capacity` undelivered failures.
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(ReporterInner {
                queue: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                available: Notify::new(),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Pushes a failure, evicting the oldest one when the queue is full.
    pub(crate) async fn report(&self, failure: InsertFailure) {
        let mut queue = self.inner.queue.lock().await;

        if queue.len() == self.inner.capacity {
            if let Some(evicted) = queue.pop_front() {
                let dropped = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    destination = %evicted.destination,
                    rows = evicted.row_count(),
                    dropped,
                    "error queue full, dropping oldest failure"
                );
            }
        }

        queue.push_back(failure);
        drop(queue);

        self.inner.available.notify_one();
    }

    /// Waits for the next failure.
    ///
    /// Never returns `None` while the pipeline is alive; call it in a loop from
    /// a dedicated drain task or poll [`ErrorReporter::try_recv`] after close.
    pub async fn recv(&self) -> InsertFailure {
        loop {
            if let Some(failure) = self.try_recv().await {
                return failure;
            }

            self.inner.available.notified().await;
        }
    }

    /// Pops the next failure without waiting.
    pub async fn try_recv(&self) -> Option<InsertFailure> {
        self.inner.queue.lock().await.pop_front()
    }

    /// Number of failures evicted because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Number of failures waiting to be drained.
    pub async fn len(&self) -> usize {
        self.inner.queue.lock().await.len()
    }

    /// Whether no failure is waiting to be drained.
    pub async fn is_empty(&self) -> bool {
        self.inner.queue.lock().await.is_empty()
    }
}
