//! Asynchronous batched streaming-insert pipeline for tabular data services.
//!
//! Rows are enqueued without blocking, accumulated into per-destination batches
//! by size and time triggers, and delivered by a pool of concurrent workers.
//! Transient failures are retried on a fixed interval up to a configurable
//! budget; terminal failures are delivered out-of-band through an error
//! reporter instead of being returned to the enqueueing caller.
//!
//! The entry point is [`pipeline::Streamer`], parameterized over the
//! [`client::InsertClient`] used to reach the endpoint.
//!
//! ```no_run
//! use rowstream::client::memory::MemoryInsertClient;
//! use rowstream::config::StreamerConfig;
//! use rowstream::pipeline::Streamer;
//! use rowstream::types::{FieldMap, Row, TableRef};
//!
//! # async fn run() -> Result<(), rowstream::error::StreamError> {
//! let mut streamer = Streamer::new(StreamerConfig::default(), MemoryInsertClient::new())?;
//! streamer.start()?;
//!
//! let destination = TableRef::new("project", "dataset", "table");
//! streamer.enqueue(Row::new(destination, FieldMap::new())).await?;
//!
//! streamer.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod reporter;
pub mod types;

mod batcher;
mod concurrency;
mod macros;
mod retries;
mod workers;
