//! HTTP implementation of the insert endpoint client.
//!
//! Speaks the streaming-insert JSON wire format: one POST per batch, with the
//! response listing only the rows that failed, aligned to the request by row
//! index. Failure reasons reported by the endpoint are classified into
//! retriable and non-retriable kinds.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::bail;
use crate::client::base::{InsertClient, InsertRequest};
use crate::config::NetworkTransport;
use crate::error::{ErrorKind, StreamResult};
use crate::types::{FieldMap, InsertOutcome, InsertResponse, RowError, RowErrorKind};

/// Failure reasons the endpoint reports for transient conditions. Everything
/// else is treated as non-retriable.
const RETRIABLE_REASONS: &[&str] = &[
    "backendError",
    "internalError",
    "timeout",
    "rateLimitExceeded",
    "quotaExceeded",
];

/// Configuration for [`HttpInsertClient`].
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HttpClientConfig {
    /// Base URL of the insert endpoint, without a trailing slash.
    pub base_url: String,
    /// Pre-loaded bearer token attached to every request. Credential loading
    /// itself is the caller's responsibility.
    pub bearer_token: Option<String>,
    /// Network stack selector.
    #[serde(default)]
    pub transport: NetworkTransport,
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl HttpClientConfig {
    /// Default per-request timeout in milliseconds.
    pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
}

fn default_request_timeout_ms() -> u64 {
    HttpClientConfig::DEFAULT_REQUEST_TIMEOUT_MS
}

/// Insert endpoint client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpInsertClient {
    http: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
    transport: NetworkTransport,
}

impl HttpInsertClient {
    /// Builds a new HTTP client from the given configuration.
    ///
    /// With [`NetworkTransport::Ipv4Only`] the client binds its local address
    /// to the IPv4 wildcard, which forces every connection onto the IPv4
    /// stack.
    pub fn new(config: HttpClientConfig) -> StreamResult<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms));

        if config.transport == NetworkTransport::Ipv4Only {
            builder = builder.local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        }

        let http = match builder.build() {
            Ok(http) => http,
            Err(err) => {
                bail!(
                    ErrorKind::ConfigError,
                    "Failed to build HTTP client",
                    source: err
                );
            }
        };

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bearer_token: config.bearer_token,
            transport: config.transport,
        })
    }

    /// Returns the network stack selector this client was built with.
    pub fn transport(&self) -> NetworkTransport {
        self.transport
    }

    fn insert_url(&self, request: &InsertRequest<'_>) -> String {
        format!(
            "{}/projects/{}/datasets/{}/tables/{}/insertAll",
            self.base_url,
            request.destination.project,
            request.destination.dataset,
            request.destination.table
        )
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest<'a> {
    skip_invalid_rows: bool,
    ignore_unknown_values: bool,
    rows: Vec<WireRow<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRow<'a> {
    insert_id: &'a str,
    json: &'a FieldMap,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponse {
    #[serde(default)]
    insert_errors: Vec<WireRowErrors>,
}

#[derive(Deserialize)]
struct WireRowErrors {
    index: usize,
    #[serde(default)]
    errors: Vec<WireError>,
}

#[derive(Deserialize)]
struct WireError {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

fn classify_reason(reason: &str) -> RowErrorKind {
    if RETRIABLE_REASONS.contains(&reason) {
        RowErrorKind::Retriable
    } else {
        RowErrorKind::NonRetriable
    }
}

impl InsertClient for HttpInsertClient {
    async fn insert(&self, request: InsertRequest<'_>) -> StreamResult<InsertResponse> {
        let body = WireRequest {
            skip_invalid_rows: request.skip_invalid_rows,
            ignore_unknown_values: request.ignore_unknown_values,
            rows: request
                .rows
                .iter()
                .map(|row| WireRow {
                    insert_id: row.insert_id(),
                    json: row.fields(),
                })
                .collect(),
        };

        let mut http_request = self.http.post(self.insert_url(&request)).json(&body);
        if let Some(token) = &self.bearer_token {
            http_request = http_request.bearer_auth(token);
        }

        let response = http_request.send().await?;
        let status = response.status();

        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            bail!(
                ErrorKind::TransportError,
                "Insert endpoint returned a retriable status",
                format!("status {status}")
            );
        }

        if !status.is_success() {
            // A 4xx without per-row outcomes cannot succeed on resubmission.
            bail!(
                ErrorKind::RowValidationError,
                "Insert endpoint rejected the request",
                format!("status {status}")
            );
        }

        let wire: WireResponse = response.json().await?;

        let row_errors = wire
            .insert_errors
            .into_iter()
            .map(|row_errors| {
                // The endpoint may report several errors per row; the first one
                // decides whether the row is retriable.
                let (kind, reason, message) = row_errors
                    .errors
                    .into_iter()
                    .next()
                    .map(|err| (classify_reason(&err.reason), err.reason, err.message))
                    .unwrap_or((RowErrorKind::NonRetriable, String::new(), String::new()));

                InsertOutcome {
                    index: row_errors.index,
                    error: RowError {
                        kind,
                        reason,
                        message,
                    },
                }
            })
            .collect();

        Ok(InsertResponse { row_errors })
    }
}
