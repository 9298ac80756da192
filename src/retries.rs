//! Scheduling of failed batches for delayed resubmission.
//!
//! A worker whose batch failed retriably hands it to the [`RetryScheduler`].
//! When the retry budget still allows another submission, the batch is parked
//! for a fixed interval in a background runner task and then pushed back onto
//! the work queue, where any worker may pick it up. The delay is the same for
//! every retry, there is no backoff or jitter.
//!
//! The runner exits when every scheduler handle is gone, which the pipeline
//! arranges to happen only after all workers joined. Batches still parked at
//! that point are reported as abandoned.

use std::collections::HashMap;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::time::{DelayQueue, delay_queue};
use tracing::{debug, info, warn};

use crate::concurrency::tracker::PendingTracker;
use crate::reporter::ErrorReporter;
use crate::types::{Batch, InsertFailure};

/// Hands failed batches to the retry runner, or reports them as terminal when
/// the retry budget is spent.
#[derive(Debug, Clone)]
pub(crate) struct RetryScheduler {
    retry_tx: mpsc::UnboundedSender<Batch>,
    reporter: ErrorReporter,
    pending: PendingTracker,
    max_retries: u32,
}

impl RetryScheduler {
    /// Creates a scheduler together with the receiver side for
    /// [`spawn_retry_runner`].
    pub fn new(
        reporter: ErrorReporter,
        pending: PendingTracker,
        max_retries: u32,
    ) -> (Self, mpsc::UnboundedReceiver<Batch>) {
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();

        let scheduler = Self {
            retry_tx,
            reporter,
            pending,
            max_retries,
        };

        (scheduler, retry_rx)
    }

    /// Schedules a failed batch for another submission.
    ///
    /// The batch must already carry the record of the attempt that failed. When
    /// the submission count exceeds the retry budget, the batch is reported as
    /// terminally failed instead.
    pub async fn schedule(&self, batch: Batch) {
        if batch.attempt() > self.max_retries {
            warn!(
                destination = %batch.destination(),
                rows = batch.len(),
                attempts = batch.attempt(),
                "retry budget exhausted, reporting batch as failed"
            );

            self.reporter
                .report(InsertFailure::retries_exhausted(batch))
                .await;
            self.pending.complete();

            return;
        }

        debug!(
            destination = %batch.destination(),
            rows = batch.len(),
            attempts = batch.attempt(),
            "scheduling batch for retry"
        );

        if let Err(err) = self.retry_tx.send(batch) {
            // The runner outlives every scheduler handle, so this only fires if
            // the runner task itself died.
            warn!("retry runner is gone, abandoning batch");

            self.reporter.report(InsertFailure::abandoned(err.0)).await;
            self.pending.complete();
        }
    }
}

/// Starts the background task that holds delayed batches and releases them back
/// onto the work queue.
///
/// The task exits when `retry_rx` closes, then reports every still parked batch
/// as abandoned.
pub(crate) fn spawn_retry_runner(
    mut retry_rx: mpsc::UnboundedReceiver<Batch>,
    queue_tx: mpsc::UnboundedSender<Batch>,
    reporter: ErrorReporter,
    pending: PendingTracker,
    retry_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("starting retry runner task");

        let mut delayed: DelayQueue<(u64, Batch)> = DelayQueue::new();
        // The delay queue cannot be drained by iteration, so every parked
        // batch keeps its removal key here until it expires.
        let mut keys: HashMap<u64, delay_queue::Key> = HashMap::new();
        let mut next_id: u64 = 0;

        loop {
            // An empty delay queue reports itself as exhausted, so wait for
            // the next parked batch first.
            if delayed.is_empty() {
                match retry_rx.recv().await {
                    Some(batch) => {
                        let key = delayed.insert((next_id, batch), retry_interval);
                        keys.insert(next_id, key);
                        next_id += 1;
                    }
                    None => break,
                }
                continue;
            }

            tokio::select! {
                expired = delayed.next() => {
                    if let Some(expired) = expired {
                        let (id, batch) = expired.into_inner();
                        keys.remove(&id);

                        debug!(
                            destination = %batch.destination(),
                            rows = batch.len(),
                            "retry delay elapsed, requeueing batch"
                        );

                        if let Err(err) = queue_tx.send(batch) {
                            warn!("work queue is gone, abandoning retried batch");
                            reporter.report(InsertFailure::abandoned(err.0)).await;
                            pending.complete();
                        }
                    }
                }
                scheduled = retry_rx.recv() => match scheduled {
                    Some(batch) => {
                        let key = delayed.insert((next_id, batch), retry_interval);
                        keys.insert(next_id, key);
                        next_id += 1;
                    }
                    None => break,
                },
            }
        }

        // Every batch still parked here missed the shutdown drain.
        let abandoned = keys.len();
        for (_, key) in keys.drain() {
            let (_, batch) = delayed.remove(&key).into_inner();
            reporter.report(InsertFailure::abandoned(batch)).await;
            pending.complete();
        }

        if abandoned > 0 {
            warn!(batches = abandoned, "abandoned parked retries at shutdown");
        }

        info!("retry runner task stopped");
    })
}
