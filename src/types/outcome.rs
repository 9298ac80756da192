use serde::{Deserialize, Serialize};

/// Classification of a per-row failure reported by the insert endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowErrorKind {
    /// The failure is expected to be transient, for example a quota or timeout
    /// error. The row may succeed on resubmission.
    Retriable,
    /// The failure will not succeed on resubmission, for example a malformed
    /// row. The row is reported and never retried.
    NonRetriable,
}

/// A single per-row failure from the insert endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowError {
    /// Whether a resubmission of the row can be expected to succeed.
    pub kind: RowErrorKind,
    /// Machine-readable failure reason, as reported by the endpoint.
    pub reason: String,
    /// Human-readable failure message.
    pub message: String,
}

/// The outcome of one row within a structured insert response.
///
/// Only failed rows carry an outcome; a row whose index has no outcome was
/// inserted successfully.
#[derive(Debug, Clone)]
pub struct InsertOutcome {
    /// Index of the row within the submitted batch.
    pub index: usize,
    /// The failure reported for this row.
    pub error: RowError,
}

/// Structured response of one insert call, aligned to the submitted batch by
/// row index.
#[derive(Debug, Clone, Default)]
pub struct InsertResponse {
    /// Per-row failures. Empty when every row was inserted.
    pub row_errors: Vec<InsertOutcome>,
}

impl InsertResponse {
    /// A response with every row inserted successfully.
    pub fn success() -> Self {
        Self::default()
    }

    /// Returns `true` if every row of the batch was inserted.
    pub fn is_success(&self) -> bool {
        self.row_errors.is_empty()
    }
}
