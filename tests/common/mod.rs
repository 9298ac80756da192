//! Shared helpers for pipeline integration tests.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use rowstream::client::{InsertClient, InsertRequest};
use rowstream::error::{ErrorKind, StreamResult};
use rowstream::stream_error;
use rowstream::types::{
    FieldMap, InsertOutcome, InsertResponse, Row, RowError, RowErrorKind, TableRef,
};

/// One scripted reply of the [`ScriptedInsertClient`].
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Every row of the call is accepted.
    Success,
    /// The call fails at transport level, no per-row outcome.
    Transport,
    /// The endpoint rejects the request outright; resubmission cannot succeed.
    Rejected,
    /// The listed row indexes fail with the given kind, the rest is accepted.
    RowErrors(Vec<(usize, RowErrorKind)>),
}

#[derive(Debug, Default)]
struct ScriptedState {
    script: VecDeque<ScriptedResponse>,
    call_sizes: Vec<usize>,
    delivered: HashMap<TableRef, Vec<Row>>,
}

/// Insert client that replays a prepared script of responses.
///
/// Responses are consumed in order, one per insert call regardless of
/// destination. When the script runs out, every further call succeeds. Calls
/// and accepted rows are recorded for assertions.
#[derive(Debug, Clone, Default)]
pub struct ScriptedInsertClient {
    state: Arc<Mutex<ScriptedState>>,
}

impl ScriptedInsertClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_response(&self, response: ScriptedResponse) {
        self.state.lock().await.script.push_back(response);
    }

    pub async fn push_responses(&self, responses: impl IntoIterator<Item = ScriptedResponse>) {
        self.state.lock().await.script.extend(responses);
    }

    /// Row counts of every insert call, in call order.
    pub async fn call_sizes(&self) -> Vec<usize> {
        self.state.lock().await.call_sizes.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.state.lock().await.call_sizes.len()
    }

    /// Rows the endpoint accepted, per destination.
    pub async fn delivered(&self) -> HashMap<TableRef, Vec<Row>> {
        self.state.lock().await.delivered.clone()
    }

    pub async fn delivered_count(&self) -> usize {
        self.state
            .lock()
            .await
            .delivered
            .values()
            .map(Vec::len)
            .sum()
    }
}

impl InsertClient for ScriptedInsertClient {
    async fn insert(&self, request: InsertRequest<'_>) -> StreamResult<InsertResponse> {
        let mut state = self.state.lock().await;
        state.call_sizes.push(request.rows.len());

        let response = state
            .script
            .pop_front()
            .unwrap_or(ScriptedResponse::Success);

        match response {
            ScriptedResponse::Success => {
                state
                    .delivered
                    .entry(request.destination.clone())
                    .or_default()
                    .extend_from_slice(request.rows);

                Ok(InsertResponse::success())
            }
            ScriptedResponse::Transport => Err(stream_error!(
                ErrorKind::TransportError,
                "Scripted transport failure"
            )),
            ScriptedResponse::Rejected => Err(stream_error!(
                ErrorKind::RowValidationError,
                "Scripted request rejection",
                "status 400"
            )),
            ScriptedResponse::RowErrors(failures) => {
                let failed: HashMap<usize, RowErrorKind> = failures.iter().copied().collect();

                let accepted: Vec<Row> = request
                    .rows
                    .iter()
                    .enumerate()
                    .filter(|(index, _)| !failed.contains_key(index))
                    .map(|(_, row)| row.clone())
                    .collect();
                state
                    .delivered
                    .entry(request.destination.clone())
                    .or_default()
                    .extend(accepted);

                let row_errors = failures
                    .into_iter()
                    .map(|(index, kind)| InsertOutcome {
                        index,
                        error: RowError {
                            kind,
                            reason: match kind {
                                RowErrorKind::Retriable => "backendError".to_string(),
                                RowErrorKind::NonRetriable => "invalid".to_string(),
                            },
                            message: "scripted row failure".to_string(),
                        },
                    })
                    .collect();

                Ok(InsertResponse { row_errors })
            }
        }
    }
}

/// Initializes test logging, honoring `RUST_LOG` when set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Builds a row for the given table under a fixed project and dataset.
pub fn test_row(table: &str) -> Row {
    Row::new(test_table(table), FieldMap::new())
}

pub fn test_table(table: &str) -> TableRef {
    TableRef::new("test-project", "test-dataset", table)
}

/// Polls `condition` until it holds or the deadline expires.
pub async fn wait_until<F, Fut>(deadline: Duration, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let started = Instant::now();

    loop {
        if condition().await {
            return;
        }

        assert!(
            started.elapsed() < deadline,
            "condition not reached within {deadline:?}"
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
