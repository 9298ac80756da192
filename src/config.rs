//! Configuration surface for the streaming-insert pipeline.
//!
//! All settings are plain structs with serde support and documented defaults,
//! validated once at construction time so invalid option values fail fast.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors detected while validating a [`StreamerConfig`].
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Worker count cannot be zero.
    #[error("`num_workers` cannot be zero")]
    NumWorkersZero,
    /// Batch size trigger cannot be zero.
    #[error("`batch.max_rows` cannot be zero")]
    BatchMaxRowsZero,
    /// The error reporter queue must be able to hold at least one failure.
    #[error("`error_queue_capacity` cannot be zero")]
    ErrorQueueCapacityZero,
}

/// Selects the network stack used to reach the insert endpoint.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum NetworkTransport {
    /// Resolve and connect over IPv4 only.
    Ipv4Only,
    /// Use whatever the operating system prefers, IPv4 or IPv6.
    #[default]
    DualStack,
}

/// Batch accumulation configuration.
///
/// A destination's open batch is flushed to the workers when either trigger
/// fires, whichever comes first.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BatchConfig {
    /// Maximum number of rows accumulated before a batch is flushed.
    #[serde(default = "default_batch_max_rows")]
    pub max_rows: usize,
    /// Maximum time, in milliseconds, a batch may wait to fill before it is
    /// flushed anyway, measured from its oldest row.
    #[serde(default = "default_batch_max_fill_ms")]
    pub max_fill_ms: u64,
}

impl BatchConfig {
    /// Default maximum batch size.
    pub const DEFAULT_MAX_ROWS: usize = 500;

    /// Default maximum fill time in milliseconds.
    pub const DEFAULT_MAX_FILL_MS: u64 = 1000;

    /// Returns the fill deadline as a [`Duration`].
    pub fn max_fill(&self) -> Duration {
        Duration::from_millis(self.max_fill_ms)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_rows: default_batch_max_rows(),
            max_fill_ms: default_batch_max_fill_ms(),
        }
    }
}

/// Retry behavior for failed insert attempts.
///
/// The delay between attempts is fixed, with no exponential backoff and no
/// jitter. A burst of simultaneously failing batches therefore retries in
/// lockstep. This is a deliberate simplicity trade-off, kept from the original
/// behavior rather than silently upgraded.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Time to wait, in milliseconds, before a failed batch is resubmitted.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// Maximum number of retries a failed batch is allowed. Zero disables
    /// retries entirely; the first failure is then terminal.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl RetryConfig {
    /// Default retry interval in milliseconds.
    pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 1000;

    /// Default maximum retry count.
    pub const DEFAULT_MAX_RETRIES: u32 = 10;

    /// Returns the retry interval as a [`Duration`].
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: default_retry_interval_ms(),
            max_retries: default_max_retries(),
        }
    }
}

/// Configuration for a [`crate::pipeline::Streamer`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StreamerConfig {
    /// Number of concurrent insert workers sharing the work queue.
    #[serde(default = "default_num_workers")]
    pub num_workers: u16,
    /// Batch accumulation settings.
    #[serde(default)]
    pub batch: BatchConfig,
    /// Retry settings for failed inserts.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Ask the endpoint to tolerate unknown fields instead of rejecting the row.
    #[serde(default)]
    pub ignore_unknown_values: bool,
    /// Ask the endpoint to keep inserting valid rows when a batch contains
    /// invalid ones, instead of rejecting the whole batch.
    #[serde(default)]
    pub skip_invalid_rows: bool,
    /// Maximum time, in milliseconds, [`crate::pipeline::Streamer::close`] waits
    /// for queued and in-flight batches to drain. Work still pending afterwards
    /// is reported as abandoned, never silently lost.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    /// Maximum number of terminal failures buffered by the error reporter before
    /// the oldest are dropped (and counted).
    #[serde(default = "default_error_queue_capacity")]
    pub error_queue_capacity: usize,
    /// Network stack selector for the insert endpoint client.
    #[serde(default)]
    pub transport: NetworkTransport,
}

impl StreamerConfig {
    /// Default number of insert workers.
    pub const DEFAULT_NUM_WORKERS: u16 = 10;

    /// Default shutdown grace period in milliseconds.
    pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 15_000;

    /// Default error reporter queue capacity.
    pub const DEFAULT_ERROR_QUEUE_CAPACITY: usize = 1024;

    /// Validates streamer configuration settings.
    ///
    /// Ensures worker count, batch size, and reporter capacity are non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.num_workers == 0 {
            return Err(ValidationError::NumWorkersZero);
        }

        if self.batch.max_rows == 0 {
            return Err(ValidationError::BatchMaxRowsZero);
        }

        if self.error_queue_capacity == 0 {
            return Err(ValidationError::ErrorQueueCapacityZero);
        }

        Ok(())
    }

    /// Returns the shutdown grace period as a [`Duration`].
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            num_workers: default_num_workers(),
            batch: BatchConfig::default(),
            retry: RetryConfig::default(),
            ignore_unknown_values: false,
            skip_invalid_rows: false,
            shutdown_grace_ms: default_shutdown_grace_ms(),
            error_queue_capacity: default_error_queue_capacity(),
            transport: NetworkTransport::default(),
        }
    }
}

fn default_num_workers() -> u16 {
    StreamerConfig::DEFAULT_NUM_WORKERS
}

fn default_batch_max_rows() -> usize {
    BatchConfig::DEFAULT_MAX_ROWS
}

fn default_batch_max_fill_ms() -> u64 {
    BatchConfig::DEFAULT_MAX_FILL_MS
}

fn default_retry_interval_ms() -> u64 {
    RetryConfig::DEFAULT_RETRY_INTERVAL_MS
}

fn default_max_retries() -> u32 {
    RetryConfig::DEFAULT_MAX_RETRIES
}

fn default_shutdown_grace_ms() -> u64 {
    StreamerConfig::DEFAULT_SHUTDOWN_GRACE_MS
}

fn default_error_queue_capacity() -> usize {
    StreamerConfig::DEFAULT_ERROR_QUEUE_CAPACITY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = StreamerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.num_workers, 10);
        assert_eq!(config.batch.max_rows, 500);
        assert_eq!(config.retry.max_retries, 10);
    }

    #[test]
    fn zero_workers_is_rejected() {
        let config = StreamerConfig {
            num_workers: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::NumWorkersZero)
        ));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let config = StreamerConfig {
            batch: BatchConfig {
                max_rows: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::BatchMaxRowsZero)
        ));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: StreamerConfig = serde_json::from_str("{}").expect("empty config");
        assert_eq!(config.batch.max_fill_ms, BatchConfig::DEFAULT_MAX_FILL_MS);
        assert_eq!(config.transport, NetworkTransport::DualStack);
    }
}
