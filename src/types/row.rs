use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Fully qualified identifier of a destination table.
///
/// Used as the grouping key for batch accumulation, so it implements [`Eq`] and
/// [`std::hash::Hash`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    /// Project the dataset belongs to.
    pub project: String,
    /// Dataset the table belongs to.
    pub dataset: String,
    /// Table name.
    pub table: String,
}

impl TableRef {
    /// Creates a new table reference.
    pub fn new<P, D, T>(project: P, dataset: D, table: T) -> Self
    where
        P: Into<String>,
        D: Into<String>,
        T: Into<String>,
    {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// Field name to JSON value mapping of a single row.
pub type FieldMap = serde_json::Map<String, serde_json::Value>;

/// A single record destined for a specific table.
///
/// Rows are immutable after creation. Each row carries an insert ID which the
/// endpoint may use as a best-effort deduplication hint when a batch is
/// resubmitted after a transport failure.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    destination: TableRef,
    insert_id: String,
    fields: FieldMap,
}

impl Row {
    /// Creates a row with a freshly generated unique insert ID.
    pub fn new(destination: TableRef, fields: FieldMap) -> Self {
        Self {
            destination,
            insert_id: Uuid::new_v4().to_string(),
            fields,
        }
    }

    /// Creates a row with a caller-supplied insert ID.
    pub fn with_insert_id<I>(destination: TableRef, fields: FieldMap, insert_id: I) -> Self
    where
        I: Into<String>,
    {
        Self {
            destination,
            insert_id: insert_id.into(),
            fields,
        }
    }

    /// Returns the destination table of this row.
    pub fn destination(&self) -> &TableRef {
        &self.destination
    }

    /// Returns the insert ID of this row.
    pub fn insert_id(&self) -> &str {
        &self.insert_id
    }

    /// Returns the field values of this row.
    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }
}
