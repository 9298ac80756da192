use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::client::base::{InsertClient, InsertRequest};
use crate::error::StreamResult;
use crate::types::{InsertResponse, Row, TableRef};

/// In-memory insert client for testing and development purposes.
///
/// [`MemoryInsertClient`] accepts every row and stores it per destination,
/// making it ideal for testing pipeline behavior and inspecting what would
/// have been sent to a real endpoint. All data is held in memory and lost when
/// the process terminates.
#[derive(Debug, Clone, Default)]
pub struct MemoryInsertClient {
    inner: Arc<Mutex<HashMap<TableRef, Vec<Row>>>>,
}

impl MemoryInsertClient {
    /// Creates a new empty memory client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all rows delivered to this client, per destination.
    pub async fn rows(&self) -> HashMap<TableRef, Vec<Row>> {
        let inner = self.inner.lock().await;
        inner.clone()
    }

    /// Returns the total number of rows delivered across all destinations.
    pub async fn row_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.values().map(|rows| rows.len()).sum()
    }

    /// Clears all stored rows.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.clear();
    }
}

impl InsertClient for MemoryInsertClient {
    async fn insert(&self, request: InsertRequest<'_>) -> StreamResult<InsertResponse> {
        let mut inner = self.inner.lock().await;

        debug!(
            destination = %request.destination,
            rows = request.rows.len(),
            "storing batch in memory"
        );

        inner
            .entry(request.destination.clone())
            .or_default()
            .extend_from_slice(request.rows);

        Ok(InsertResponse::success())
    }
}
