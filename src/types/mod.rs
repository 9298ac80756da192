//! Core data types flowing through the pipeline.

mod batch;
mod failure;
mod outcome;
mod row;

pub use batch::{AttemptRecord, Batch};
pub use failure::{FailedRow, FailureKind, InsertFailure};
pub use outcome::{InsertOutcome, InsertResponse, RowError, RowErrorKind};
pub use row::{FieldMap, Row, TableRef};
