use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::client::{InsertClient, InsertRequest};
use crate::error::ErrorKind;
use crate::stream_error;
use crate::types::{Batch, FailedRow, FailureKind, InsertFailure, RowError, RowErrorKind};
use crate::workers::pool::WorkerContext;

/// Submits one batch and routes every row to a disposition.
///
/// Rows absent from the response are delivered. Rows with a retriable error
/// stay in the batch, which goes back through the retry scheduler. Rows with a
/// non-retriable error are reported as invalid right away. The batch is
/// completed against the pending tracker exactly when no row of it needs
/// another submission.
pub(crate) async fn execute_batch<C>(context: &Arc<WorkerContext<C>>, mut batch: Batch)
where
    C: InsertClient + Send + Sync + 'static,
{
    let result = {
        let request = InsertRequest {
            destination: batch.destination(),
            rows: batch.rows(),
            skip_invalid_rows: context.skip_invalid_rows,
            ignore_unknown_values: context.ignore_unknown_values,
        };

        context.client.insert(request).await
    };

    let response = match result {
        Ok(response) => response,
        Err(err) => {
            // Only a transport-level failure leaves resubmission worth trying.
            // Anything else, like an outright request rejection, cannot
            // succeed on a resubmit and is terminal right away.
            let retriable = err.kind() == ErrorKind::TransportError;

            warn!(
                destination = %batch.destination(),
                rows = batch.len(),
                retriable,
                error = %err,
                "batch submission failed"
            );

            batch.record_attempt(Some(err));

            if retriable {
                context.scheduler.schedule(batch).await;
            } else {
                context.reporter.report(InsertFailure::rejected(batch)).await;
                context.pending.complete();
            }

            return;
        }
    };

    if response.is_success() {
        debug!(
            destination = %batch.destination(),
            rows = batch.len(),
            "batch delivered"
        );

        batch.record_attempt(None);
        context.pending.complete();

        return;
    }

    // Partition rows by their reported outcome. Absence from the error list
    // means the row was inserted.
    let mut errors: HashMap<usize, RowError> = response
        .row_errors
        .into_iter()
        .map(|outcome| (outcome.index, outcome.error))
        .collect();

    let rows = batch.take_rows();
    let mut retriable = Vec::new();
    let mut invalid = Vec::new();
    let mut delivered = 0usize;

    for (index, row) in rows.into_iter().enumerate() {
        match errors.remove(&index) {
            None => delivered += 1,
            Some(error) if error.kind == RowErrorKind::Retriable => retriable.push(row),
            Some(error) => invalid.push(FailedRow {
                row,
                error: Some(error),
            }),
        }
    }

    debug!(
        destination = %batch.destination(),
        delivered,
        retriable = retriable.len(),
        invalid = invalid.len(),
        "batch partially failed"
    );

    if retriable.is_empty() {
        batch.record_attempt(None);
    } else {
        batch.set_rows(retriable);
        batch.record_attempt(Some(stream_error!(
            ErrorKind::TransportError,
            "Endpoint reported retriable row failures",
            format!("{} rows to retry", batch.len())
        )));
    }

    if !invalid.is_empty() {
        context
            .reporter
            .report(InsertFailure {
                destination: batch.destination().clone(),
                kind: FailureKind::InvalidRows,
                rows: invalid,
                attempts: batch.attempts().to_vec(),
            })
            .await;
    }

    if batch.is_empty() {
        // Every row was either delivered or reported as invalid.
        context.pending.complete();
    } else {
        context.scheduler.schedule(batch).await;
    }
}
