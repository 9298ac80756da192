use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::client::InsertClient;
use crate::concurrency::shutdown::ShutdownRx;
use crate::concurrency::tracker::PendingTracker;
use crate::error::{ErrorKind, StreamError, StreamResult};
use crate::reporter::ErrorReporter;
use crate::retries::RetryScheduler;
use crate::stream_error;
use crate::types::Batch;
use crate::workers::insert::execute_batch;

/// Everything a worker needs to process batches.
///
/// Held behind an [`Arc`] by every worker task. The retry scheduler handle
/// inside is what keeps the retry runner alive, so the context must not be
/// stored anywhere that outlives the pool.
#[derive(Debug)]
pub(crate) struct WorkerContext<C> {
    pub client: Arc<C>,
    pub scheduler: RetryScheduler,
    pub reporter: ErrorReporter,
    pub pending: PendingTracker,
    pub skip_invalid_rows: bool,
    pub ignore_unknown_values: bool,
}

/// A fixed-size pool of worker tasks sharing one work queue.
#[derive(Debug)]
pub(crate) struct WorkerPool {
    workers: JoinSet<()>,
}

impl WorkerPool {
    /// Spawns `num_workers` workers draining `queue_rx`.
    ///
    /// Workers stop when the queue closes or the shutdown signal fires,
    /// finishing the batch they hold first.
    pub fn start<C>(
        num_workers: u16,
        context: Arc<WorkerContext<C>>,
        queue_rx: Arc<Mutex<mpsc::UnboundedReceiver<Batch>>>,
        shutdown_rx: ShutdownRx,
    ) -> Self
    where
        C: InsertClient + Send + Sync + 'static,
    {
        info!(num_workers, "starting worker pool");

        let mut workers = JoinSet::new();
        for worker_id in 0..num_workers {
            let context = context.clone();
            let queue_rx = queue_rx.clone();
            let shutdown_rx = shutdown_rx.clone();

            workers.spawn(worker_loop(worker_id, context, queue_rx, shutdown_rx));
        }

        Self { workers }
    }

    /// Waits for every worker to stop.
    ///
    /// Panicked workers surface as [`ErrorKind::WorkerPanic`]; when several
    /// workers fail, all of their errors are returned together.
    pub async fn wait_all(mut self) -> StreamResult<()> {
        let mut errors: Vec<StreamError> = Vec::new();

        while let Some(result) = self.workers.join_next().await {
            match result {
                Ok(()) => {}
                Err(join_err) if join_err.is_cancelled() => {
                    debug!("worker task was cancelled");
                }
                Err(join_err) => {
                    error!(error = %join_err, "worker task panicked");
                    errors.push(stream_error!(
                        ErrorKind::WorkerPanic,
                        "A worker task panicked",
                        source: join_err
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }
}

async fn worker_loop<C>(
    worker_id: u16,
    context: Arc<WorkerContext<C>>,
    queue_rx: Arc<Mutex<mpsc::UnboundedReceiver<Batch>>>,
    mut shutdown_rx: ShutdownRx,
) where
    C: InsertClient + Send + Sync + 'static,
{
    debug!(worker_id, "worker started");

    loop {
        // The receiver lock is held only while waiting for a batch, never
        // during submission, so workers submit concurrently.
        let batch = {
            let mut queue_rx = queue_rx.lock().await;

            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => None,
                batch = queue_rx.recv() => batch,
            }
        };

        let Some(batch) = batch else {
            break;
        };

        execute_batch(&context, batch).await;
    }

    debug!(worker_id, "worker stopped");
}
