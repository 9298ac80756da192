use crate::types::batch::{AttemptRecord, Batch};
use crate::types::outcome::RowError;
use crate::types::row::{Row, TableRef};

/// Why a set of rows reached a terminal failed disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The endpoint rejected the rows as invalid; resubmission cannot succeed.
    InvalidRows,
    /// The batch exhausted its retry budget.
    RetriesExhausted,
    /// The shutdown grace period expired with the rows still pending.
    ShutdownAbandoned,
}

/// A row that reached a terminal failed disposition.
#[derive(Debug, Clone)]
pub struct FailedRow {
    /// The row itself, handed back so the caller can log or re-route it.
    pub row: Row,
    /// The per-row error from the endpoint, when the failure was row-level.
    pub error: Option<RowError>,
}

/// A terminal failure delivered through the error reporter.
///
/// Carries every affected row together with the full attempt history of the
/// batch they last belonged to, so the caller can log or alert with complete
/// context.
#[derive(Debug, Clone)]
pub struct InsertFailure {
    /// Destination table of the failed rows.
    pub destination: TableRef,
    /// Why these rows failed.
    pub kind: FailureKind,
    /// The failed rows.
    pub rows: Vec<FailedRow>,
    /// Submission history of the batch, oldest attempt first.
    pub attempts: Vec<AttemptRecord>,
}

impl InsertFailure {
    /// Builds a terminal failure for a batch that exhausted its retry budget.
    pub(crate) fn retries_exhausted(batch: Batch) -> Self {
        Self::from_batch(FailureKind::RetriesExhausted, batch)
    }

    /// Builds a terminal failure for a batch abandoned at shutdown.
    pub(crate) fn abandoned(batch: Batch) -> Self {
        Self::from_batch(FailureKind::ShutdownAbandoned, batch)
    }

    /// Builds a terminal failure for a batch the endpoint rejected outright,
    /// with no per-row outcomes.
    pub(crate) fn rejected(batch: Batch) -> Self {
        Self::from_batch(FailureKind::InvalidRows, batch)
    }

    fn from_batch(kind: FailureKind, batch: Batch) -> Self {
        let (destination, rows, attempts) = batch.into_parts();
        Self {
            destination,
            kind,
            rows: rows
                .into_iter()
                .map(|row| FailedRow { row, error: None })
                .collect(),
            attempts,
        }
    }

    /// Returns the number of rows covered by this failure.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}
