//! Worker pool draining the shared work queue.
//!
//! Workers are identical and stateless. Each one repeatedly takes a batch off
//! the shared queue, submits it through the insert client, and routes failures
//! to the retry scheduler or the error reporter.

pub(crate) mod insert;
pub(crate) mod pool;
