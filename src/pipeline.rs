//! The streaming-insert pipeline facade.
//!
//! A [`Streamer`] owns every moving part: the batcher and its fill timer, the
//! shared work queue, the worker pool, the retry runner, and the error
//! reporter. Callers enqueue rows, drain the reporter, and close the pipeline
//! when done.

use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::batcher::Batcher;
#[cfg(feature = "http")]
use crate::client::http::{HttpClientConfig, HttpInsertClient};
use crate::client::InsertClient;
use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::concurrency::tracker::PendingTracker;
use crate::config::StreamerConfig;
use crate::error::{ErrorKind, StreamError, StreamResult};
use crate::reporter::ErrorReporter;
use crate::retries::{RetryScheduler, spawn_retry_runner};
use crate::stream_error;
use crate::types::{Batch, InsertFailure, Row, TableRef};
use crate::workers::pool::{WorkerContext, WorkerPool};
use crate::bail;

/// Lifecycle of a [`Streamer`].
#[derive(Debug)]
enum StreamerState {
    NotStarted,
    Started {
        pool: WorkerPool,
        timer_task: JoinHandle<()>,
        retry_task: JoinHandle<()>,
    },
    Closed,
}

/// Asynchronous batched streaming-insert pipeline.
///
/// Rows enqueued through [`Streamer::enqueue`] are accumulated into
/// per-destination batches and delivered by a pool of concurrent workers.
/// Failed batches are retried on a fixed interval up to the configured budget;
/// terminal failures surface through the [`ErrorReporter`] instead of being
/// returned to the enqueueing caller.
///
/// The generic parameter is the [`InsertClient`] used to reach the endpoint.
#[derive(Debug)]
pub struct Streamer<C> {
    config: StreamerConfig,
    client: Arc<C>,
    batcher: Batcher,
    deadline_rx: Option<mpsc::UnboundedReceiver<(TableRef, u64)>>,
    queue_tx: mpsc::UnboundedSender<Batch>,
    queue_rx: Arc<Mutex<mpsc::UnboundedReceiver<Batch>>>,
    scheduler_parts: Option<(RetryScheduler, mpsc::UnboundedReceiver<Batch>)>,
    reporter: ErrorReporter,
    pending: PendingTracker,
    shutdown_tx: ShutdownTx,
    state: StreamerState,
}

impl<C> Streamer<C>
where
    C: InsertClient + Send + Sync + 'static,
{
    /// Creates a new pipeline from a validated configuration and a client.
    ///
    /// No task runs until [`Streamer::start`] is called. Rows may already be
    /// enqueued before that; they accumulate in the batcher.
    pub fn new(config: StreamerConfig, client: C) -> StreamResult<Self> {
        config.validate()?;

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let pending = PendingTracker::new();
        let reporter = ErrorReporter::new(config.error_queue_capacity);
        let (batcher, deadline_rx) = Batcher::new(&config.batch, queue_tx.clone(), pending.clone());
        let (scheduler, retry_rx) =
            RetryScheduler::new(reporter.clone(), pending.clone(), config.retry.max_retries);
        let (shutdown_tx, _) = create_shutdown_channel();

        Ok(Self {
            config,
            client: Arc::new(client),
            batcher,
            deadline_rx: Some(deadline_rx),
            queue_tx,
            queue_rx: Arc::new(Mutex::new(queue_rx)),
            scheduler_parts: Some((scheduler, retry_rx)),
            reporter,
            pending,
            shutdown_tx,
            state: StreamerState::NotStarted,
        })
    }

    /// Starts the worker pool and the background timer and retry tasks.
    ///
    /// Idempotent while the pipeline is running; fails with
    /// [`ErrorKind::PoolClosed`] once the pipeline was closed.
    pub fn start(&mut self) -> StreamResult<()> {
        match self.state {
            StreamerState::Started { .. } => return Ok(()),
            StreamerState::Closed => {
                bail!(ErrorKind::PoolClosed, "Cannot start a closed pipeline");
            }
            StreamerState::NotStarted => {}
        }

        let Some(deadline_rx) = self.deadline_rx.take() else {
            bail!(
                ErrorKind::InvalidState,
                "Pipeline timer channel was already consumed"
            );
        };
        let Some((scheduler, retry_rx)) = self.scheduler_parts.take() else {
            bail!(
                ErrorKind::InvalidState,
                "Pipeline retry channel was already consumed"
            );
        };

        info!(
            num_workers = self.config.num_workers,
            max_rows = self.config.batch.max_rows,
            max_fill_ms = self.config.batch.max_fill_ms,
            "starting streaming-insert pipeline"
        );

        let timer_task = self
            .batcher
            .spawn_timer(deadline_rx, self.shutdown_tx.subscribe());

        let retry_task = spawn_retry_runner(
            retry_rx,
            self.queue_tx.clone(),
            self.reporter.clone(),
            self.pending.clone(),
            self.config.retry.retry_interval(),
        );

        // The scheduler handle lives only inside the worker contexts. Once all
        // workers join, the retry channel closes and the runner drains itself.
        let context = Arc::new(WorkerContext {
            client: self.client.clone(),
            scheduler,
            reporter: self.reporter.clone(),
            pending: self.pending.clone(),
            skip_invalid_rows: self.config.skip_invalid_rows,
            ignore_unknown_values: self.config.ignore_unknown_values,
        });

        let pool = WorkerPool::start(
            self.config.num_workers,
            context,
            self.queue_rx.clone(),
            self.shutdown_tx.subscribe(),
        );

        self.state = StreamerState::Started {
            pool,
            timer_task,
            retry_task,
        };

        Ok(())
    }

    /// Enqueues one row for asynchronous insertion.
    ///
    /// Returns as soon as the row is accumulated; delivery errors surface later
    /// through the [`ErrorReporter`]. Fails with [`ErrorKind::PoolClosed`]
    /// after [`Streamer::close`].
    pub async fn enqueue(&self, row: Row) -> StreamResult<()> {
        self.batcher.enqueue(row).await
    }

    /// Returns the insert client backing this pipeline.
    pub fn client(&self) -> &C {
        &*self.client
    }

    /// Returns a handle to the terminal-failure queue.
    ///
    /// Drain it from a dedicated task while the pipeline runs, and once more
    /// with [`ErrorReporter::try_recv`] after [`Streamer::close`] returns.
    pub fn reporter(&self) -> ErrorReporter {
        self.reporter.clone()
    }

    /// Returns the number of batches flushed but not yet terminal.
    pub fn pending_batches(&self) -> usize {
        self.pending.pending()
    }

    /// Closes the pipeline: flushes open batches, drains in-flight work within
    /// the shutdown grace period, and stops every task.
    ///
    /// Work still pending when the grace period expires is reported through the
    /// error reporter as abandoned, never silently dropped. Idempotent;
    /// subsequent calls return `Ok` without further effect.
    pub async fn close(&mut self) -> StreamResult<()> {
        let state = std::mem::replace(&mut self.state, StreamerState::Closed);

        let StreamerState::Started {
            pool,
            timer_task,
            retry_task,
        } = state
        else {
            // Never started or already closed. Flush so late rows are not lost
            // silently, then abandon whatever sits in the queue.
            self.batcher.flush_all().await;
            self.abandon_queued().await;
            return Ok(());
        };

        info!("closing streaming-insert pipeline");

        self.batcher.flush_all().await;

        let grace = self.config.shutdown_grace();
        if tokio::time::timeout(grace, self.pending.wait_idle())
            .await
            .is_err()
        {
            warn!(
                pending = self.pending.pending(),
                grace_ms = self.config.shutdown_grace_ms,
                "shutdown grace period expired with work still pending"
            );
        }

        // Receivers may all be gone already when every task finished early.
        let _ = self.shutdown_tx.shutdown();

        let mut errors: Vec<StreamError> = Vec::new();

        if let Err(err) = pool.wait_all().await {
            errors.push(err);
        }

        for (name, task) in [("retry runner", retry_task), ("batch timer", timer_task)] {
            if let Err(join_err) = task.await {
                if !join_err.is_cancelled() {
                    errors.push(stream_error!(
                        ErrorKind::WorkerPanic,
                        "A pipeline task panicked",
                        format!("{name} task failed: {join_err}")
                    ));
                }
            }
        }

        self.abandon_queued().await;

        info!(
            reported_drops = self.reporter.dropped(),
            "streaming-insert pipeline closed"
        );

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }

    /// Reports every batch still sitting in the work queue as abandoned.
    async fn abandon_queued(&self) {
        let mut queue_rx = self.queue_rx.lock().await;

        let mut abandoned = 0usize;
        while let Ok(batch) = queue_rx.try_recv() {
            abandoned += 1;
            self.reporter.report(InsertFailure::abandoned(batch)).await;
            self.pending.complete();
        }

        if abandoned > 0 {
            warn!(batches = abandoned, "abandoned queued batches at shutdown");
        }
    }
}

#[cfg(feature = "http")]
impl Streamer<HttpInsertClient> {
    /// Creates a pipeline backed by an [`HttpInsertClient`].
    ///
    /// The pipeline-level [`StreamerConfig::transport`] selector is applied to
    /// the client, overriding the one in `http`, so a single configuration
    /// value controls the network stack.
    pub fn with_http(config: StreamerConfig, mut http: HttpClientConfig) -> StreamResult<Self> {
        http.transport = config.transport;
        let client = HttpInsertClient::new(http)?;

        Self::new(config, client)
    }
}
