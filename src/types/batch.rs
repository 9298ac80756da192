use chrono::{DateTime, Utc};

use crate::error::StreamError;
use crate::types::row::{Row, TableRef};

/// One submission attempt of a [`Batch`], kept for failure reporting.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    /// One-based attempt number.
    pub attempt: u32,
    /// The error that failed this attempt, if the failure was batch-level.
    pub error: Option<StreamError>,
    /// When the attempt completed.
    pub at: DateTime<Utc>,
}

/// An ordered, bounded group of rows sent together in one insert call.
///
/// All rows of a batch share one destination. A batch is created by the batcher
/// when a flush trigger fires, owned exclusively by one worker while in flight,
/// and destroyed once every row has reached a terminal disposition.
#[derive(Debug)]
pub struct Batch {
    destination: TableRef,
    rows: Vec<Row>,
    attempt: u32,
    attempts: Vec<AttemptRecord>,
}

impl Batch {
    pub(crate) fn new(destination: TableRef, rows: Vec<Row>) -> Self {
        Self {
            destination,
            rows,
            attempt: 0,
            attempts: Vec::new(),
        }
    }

    /// Returns the destination table of this batch.
    pub fn destination(&self) -> &TableRef {
        &self.destination
    }

    /// Returns the rows of this batch in enqueue order.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Returns the number of rows in this batch.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if this batch holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the number of submissions performed for this batch so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns the attempt history accumulated across submissions.
    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    /// Records a completed submission attempt.
    ///
    /// `error` is `None` when the attempt failed only at row level, with no
    /// batch-level error to attach.
    pub(crate) fn record_attempt(&mut self, error: Option<StreamError>) {
        self.attempt += 1;
        self.attempts.push(AttemptRecord {
            attempt: self.attempt,
            error,
            at: Utc::now(),
        });
    }

    /// Moves the rows out of this batch, leaving it empty.
    pub(crate) fn take_rows(&mut self) -> Vec<Row> {
        std::mem::take(&mut self.rows)
    }

    /// Replaces the rows of this batch, used to shrink it to the rows that
    /// still need a retry.
    pub(crate) fn set_rows(&mut self, rows: Vec<Row>) {
        self.rows = rows;
    }

    /// Consumes the batch into its destination, rows, and attempt history.
    pub(crate) fn into_parts(self) -> (TableRef, Vec<Row>, Vec<AttemptRecord>) {
        (self.destination, self.rows, self.attempts)
    }
}
