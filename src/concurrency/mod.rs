//! Concurrency primitives used to coordinate the pipeline tasks.
//!
//! The [`shutdown`] module implements a broadcast shutdown signal that lets the
//! pipeline stop the batch timer and the insert workers together, while the
//! [`tracker`] module counts batches between flush and terminal disposition so
//! shutdown can wait for the pipeline to drain.

pub(crate) mod shutdown;
pub(crate) mod tracker;
