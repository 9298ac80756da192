use std::future::Future;

use crate::error::StreamResult;
use crate::types::{InsertResponse, Row, TableRef};

/// One insert call against the remote endpoint.
#[derive(Debug, Clone)]
pub struct InsertRequest<'a> {
    /// Destination table of every row in the request.
    pub destination: &'a TableRef,
    /// The rows to insert, in batch order. Response outcomes are aligned to
    /// this slice by index.
    pub rows: &'a [Row],
    /// Ask the endpoint to keep inserting valid rows when the batch contains
    /// invalid ones.
    pub skip_invalid_rows: bool,
    /// Ask the endpoint to tolerate unknown fields instead of rejecting rows.
    pub ignore_unknown_values: bool,
}

/// Trait for clients that can deliver a batch of rows to the remote insert
/// endpoint.
///
/// Implementations return either a structured [`InsertResponse`] with per-row
/// outcomes, or an error with [`crate::error::ErrorKind::TransportError`] when
/// no per-row outcome could be obtained; the pipeline then treats the whole
/// batch as retriable. An error of any other kind marks the batch as rejected
/// and terminal, it is reported and never resubmitted. Implementations should
/// be safe to call concurrently from multiple workers.
pub trait InsertClient {
    /// Sends one batch of rows to the endpoint.
    fn insert(
        &self,
        request: InsertRequest<'_>,
    ) -> impl Future<Output = StreamResult<InsertResponse>> + Send;
}
