//! Per-destination batch accumulation with size and time flush triggers.
//!
//! Rows are appended to the open batch of their destination. A batch is flushed
//! to the work queue when it reaches `max_rows`, or when `max_fill_ms` elapses
//! since its first row, whichever comes first. Destinations accumulate
//! independently; there is no ordering guarantee across destinations.
//!
//! The fill deadline is tracked by a dedicated timer task owning a
//! [`DelayQueue`]. Each open batch carries a unique id that is armed together
//! with its deadline, so a deadline that fires after the batch was already
//! flushed by the size trigger is recognized as stale and ignored. This avoids
//! holding the accumulator lock across timer awaits.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::time::DelayQueue;
use tracing::{debug, info, warn};

use futures::StreamExt;

use crate::bail;
use crate::concurrency::shutdown::ShutdownRx;
use crate::concurrency::tracker::PendingTracker;
use crate::config::BatchConfig;
use crate::error::{ErrorKind, StreamResult};
use crate::types::{Batch, Row, TableRef};

/// An open, still accumulating batch for one destination.
#[derive(Debug)]
struct OpenBatch {
    /// Unique id tying the batch to its armed fill deadline.
    id: u64,
    rows: Vec<Row>,
}

#[derive(Debug)]
struct BatcherInner {
    open: HashMap<TableRef, OpenBatch>,
    /// Once closed, every enqueue fails with `PoolClosed`. Set under the same
    /// lock that guards `open`, so no row can slip in after the final flush.
    closed: bool,
}

/// Accumulates enqueued rows into per-destination batches.
#[derive(Debug, Clone)]
pub(crate) struct Batcher {
    inner: Arc<Mutex<BatcherInner>>,
    next_batch_id: Arc<AtomicU64>,
    deadline_tx: mpsc::UnboundedSender<(TableRef, u64)>,
    queue_tx: mpsc::UnboundedSender<Batch>,
    pending: PendingTracker,
    max_rows: usize,
    max_fill: Duration,
}

impl Batcher {
    /// Creates a new batcher feeding the given work queue.
    ///
    /// Returns the batcher together with the receiver of fill-deadline
    /// requests, which must be handed to [`Batcher::spawn_timer`].
    pub fn new(
        config: &BatchConfig,
        queue_tx: mpsc::UnboundedSender<Batch>,
        pending: PendingTracker,
    ) -> (Self, mpsc::UnboundedReceiver<(TableRef, u64)>) {
        let (deadline_tx, deadline_rx) = mpsc::unbounded_channel();

        let batcher = Self {
            inner: Arc::new(Mutex::new(BatcherInner {
                open: HashMap::new(),
                closed: false,
            })),
            next_batch_id: Arc::new(AtomicU64::new(0)),
            deadline_tx,
            queue_tx,
            pending,
            max_rows: config.max_rows,
            max_fill: config.max_fill(),
        };

        (batcher, deadline_rx)
    }

    /// Appends a row to the open batch of its destination.
    ///
    /// Only lock acquisition may wait here; the caller is never blocked on the
    /// endpoint or the workers. Fails only with
    /// [`ErrorKind::PoolClosed`] after the pipeline was closed.
    pub async fn enqueue(&self, row: Row) -> StreamResult<()> {
        let destination = row.destination().clone();
        let mut inner = self.inner.lock().await;

        if inner.closed {
            bail!(
                ErrorKind::PoolClosed,
                "Cannot enqueue row into a closed pool"
            );
        }

        let (rows_open, batch_id) = {
            let open_batch = inner
                .open
                .entry(destination.clone())
                .or_insert_with(|| OpenBatch {
                    id: self.next_batch_id.fetch_add(1, Ordering::Relaxed),
                    rows: Vec::new(),
                });
            open_batch.rows.push(row);
            (open_batch.rows.len(), open_batch.id)
        };

        if rows_open >= self.max_rows {
            let rows = inner
                .open
                .remove(&destination)
                .map(|open_batch| open_batch.rows)
                .unwrap_or_default();
            drop(inner);

            self.dispatch(destination, rows);
        } else if rows_open == 1 {
            drop(inner);

            // First row of a fresh batch, arm its fill deadline. A send failure
            // means the timer task is gone, which only happens during shutdown
            // when the batch gets flushed by `flush_all` anyway.
            let _ = self.deadline_tx.send((destination, batch_id));
        }

        Ok(())
    }

    /// Closes the batcher and flushes every open batch to the work queue.
    ///
    /// Idempotent; subsequent calls find the accumulator empty.
    pub async fn flush_all(&self) {
        let open = {
            let mut inner = self.inner.lock().await;
            inner.closed = true;
            std::mem::take(&mut inner.open)
        };

        for (destination, open_batch) in open {
            self.dispatch(destination, open_batch.rows);
        }
    }

    /// Moves a finished batch onto the work queue and registers it as pending.
    fn dispatch(&self, destination: TableRef, rows: Vec<Row>) {
        if rows.is_empty() {
            return;
        }

        debug!(
            destination = %destination,
            rows = rows.len(),
            "flushing batch to work queue"
        );

        self.pending.track();
        let batch = Batch::new(destination, rows);
        if let Err(err) = self.queue_tx.send(batch) {
            // The work queue receiver is owned by the pipeline for its whole
            // lifetime, so this only fires if the pipeline was dropped without
            // being closed.
            warn!(
                destination = %err.0.destination(),
                rows = err.0.len(),
                "work queue is gone, dropping flushed batch"
            );
            self.pending.complete();
        }
    }

    /// Flushes the open batch identified by `batch_id` when its fill deadline
    /// fires. A stale id means the size trigger already flushed the batch.
    async fn flush_expired(&self, destination: &TableRef, batch_id: u64) {
        let rows = {
            let mut inner = self.inner.lock().await;
            match inner.open.get(destination) {
                Some(open_batch) if open_batch.id == batch_id => inner
                    .open
                    .remove(destination)
                    .map(|open_batch| open_batch.rows)
                    .unwrap_or_default(),
                _ => return,
            }
        };

        debug!(destination = %destination, "batch fill deadline elapsed");
        self.dispatch(destination.clone(), rows);
    }

    /// Starts the background task that fires time-triggered flushes.
    ///
    /// The task owns the [`DelayQueue`] of armed fill deadlines and terminates
    /// on the shutdown signal or when the batcher is dropped.
    pub fn spawn_timer(
        &self,
        mut deadline_rx: mpsc::UnboundedReceiver<(TableRef, u64)>,
        mut shutdown_rx: ShutdownRx,
    ) -> JoinHandle<()> {
        let batcher = self.clone();

        tokio::spawn(async move {
            info!("starting batch fill timer task");

            let mut deadlines: DelayQueue<(TableRef, u64)> = DelayQueue::new();

            loop {
                // With no armed deadline the delay queue would report itself as
                // exhausted, so wait for the next arm request first.
                if deadlines.is_empty() {
                    tokio::select! {
                        armed = deadline_rx.recv() => match armed {
                            Some((destination, batch_id)) => {
                                deadlines.insert((destination, batch_id), batcher.max_fill);
                            }
                            None => break,
                        },
                        _ = shutdown_rx.changed() => break,
                    }
                    continue;
                }

                tokio::select! {
                    expired = deadlines.next() => {
                        if let Some(expired) = expired {
                            let (destination, batch_id) = expired.into_inner();
                            batcher.flush_expired(&destination, batch_id).await;
                        }
                    }
                    armed = deadline_rx.recv() => match armed {
                        Some((destination, batch_id)) => {
                            deadlines.insert((destination, batch_id), batcher.max_fill);
                        }
                        None => break,
                    },
                    _ = shutdown_rx.changed() => break,
                }
            }

            info!("batch fill timer task stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::shutdown::create_shutdown_channel;
    use crate::types::FieldMap;

    fn test_batcher(
        max_rows: usize,
        max_fill_ms: u64,
    ) -> (
        Batcher,
        mpsc::UnboundedReceiver<(TableRef, u64)>,
        mpsc::UnboundedReceiver<Batch>,
    ) {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let config = BatchConfig {
            max_rows,
            max_fill_ms,
        };
        let (batcher, deadline_rx) = Batcher::new(&config, queue_tx, PendingTracker::new());
        (batcher, deadline_rx, queue_rx)
    }

    fn row(table: &str) -> Row {
        Row::new(TableRef::new("p", "d", table), FieldMap::new())
    }

    #[tokio::test]
    async fn size_trigger_flushes_exactly_max_rows() {
        let (batcher, _deadline_rx, mut queue_rx) = test_batcher(2, 60_000);

        for _ in 0..3 {
            batcher.enqueue(row("t")).await.expect("enqueue");
        }

        let batch = queue_rx.try_recv().expect("one batch should be flushed");
        assert_eq!(batch.len(), 2);
        // The third row is still accumulating.
        assert!(queue_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn destinations_accumulate_independently() {
        let (batcher, _deadline_rx, mut queue_rx) = test_batcher(2, 60_000);

        batcher.enqueue(row("a")).await.expect("enqueue");
        batcher.enqueue(row("b")).await.expect("enqueue");
        assert!(queue_rx.try_recv().is_err());

        batcher.enqueue(row("a")).await.expect("enqueue");
        let batch = queue_rx.try_recv().expect("table a should flush");
        assert_eq!(batch.destination().table, "a");
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn timer_task_flushes_after_fill_deadline() {
        let (batcher, deadline_rx, mut queue_rx) = test_batcher(100, 50);
        let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();
        let timer = batcher.spawn_timer(deadline_rx, shutdown_rx);

        batcher.enqueue(row("t")).await.expect("enqueue");

        let batch = tokio::time::timeout(Duration::from_millis(500), queue_rx.recv())
            .await
            .expect("flush should happen within the deadline")
            .expect("queue should be open");
        assert_eq!(batch.len(), 1);

        timer.abort();
    }

    #[tokio::test]
    async fn stale_deadline_does_not_flush_the_next_batch() {
        let (batcher, mut deadline_rx, mut queue_rx) = test_batcher(2, 60_000);

        // Fill and size-flush a first batch, then open a second one.
        batcher.enqueue(row("t")).await.expect("enqueue");
        batcher.enqueue(row("t")).await.expect("enqueue");
        batcher.enqueue(row("t")).await.expect("enqueue");

        let (destination, stale_id) = deadline_rx.try_recv().expect("first deadline armed");
        queue_rx.try_recv().expect("size flush");

        // Firing the stale deadline must not flush the still-open second batch.
        batcher.flush_expired(&destination, stale_id).await;
        assert!(queue_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn enqueue_after_flush_all_fails_with_pool_closed() {
        let (batcher, _deadline_rx, mut queue_rx) = test_batcher(10, 60_000);

        batcher.enqueue(row("t")).await.expect("enqueue");
        batcher.flush_all().await;

        let batch = queue_rx.try_recv().expect("open batch should be flushed");
        assert_eq!(batch.len(), 1);

        let err = batcher.enqueue(row("t")).await.expect_err("pool is closed");
        assert_eq!(err.kind(), ErrorKind::PoolClosed);
    }
}
