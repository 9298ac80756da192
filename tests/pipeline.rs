mod common;

use std::time::Duration;

use rowstream::config::{BatchConfig, RetryConfig, StreamerConfig};
use rowstream::error::ErrorKind;
use rowstream::pipeline::Streamer;
use rowstream::types::{FailureKind, RowErrorKind};

use crate::common::{
    ScriptedInsertClient, ScriptedResponse, init_tracing, test_row, test_table, wait_until,
};

const WAIT: Duration = Duration::from_secs(5);

fn test_config(max_rows: usize, max_fill_ms: u64) -> StreamerConfig {
    StreamerConfig {
        num_workers: 4,
        batch: BatchConfig {
            max_rows,
            max_fill_ms,
        },
        retry: RetryConfig {
            retry_interval_ms: 20,
            max_retries: 3,
        },
        shutdown_grace_ms: 5_000,
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn enqueued_rows_are_batched_and_delivered() {
    init_tracing();

    let client = ScriptedInsertClient::new();
    let mut streamer = Streamer::new(test_config(2, 50), client.clone()).expect("valid config");
    streamer.start().expect("start");

    for _ in 0..3 {
        streamer.enqueue(test_row("events")).await.expect("enqueue");
    }

    wait_until(WAIT, || {
        let client = client.clone();
        async move { client.delivered_count().await == 3 }
    })
    .await;

    // The first two rows went out on the size trigger.
    assert_eq!(client.call_sizes().await[0], 2);

    streamer.close().await.expect("close");
    assert!(streamer.reporter().is_empty().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn destinations_get_separate_batches() {
    init_tracing();

    let client = ScriptedInsertClient::new();
    let mut streamer = Streamer::new(test_config(10, 50), client.clone()).expect("valid config");
    streamer.start().expect("start");

    streamer.enqueue(test_row("orders")).await.expect("enqueue");
    streamer.enqueue(test_row("users")).await.expect("enqueue");

    wait_until(WAIT, || {
        let client = client.clone();
        async move { client.delivered_count().await == 2 }
    })
    .await;

    let delivered = client.delivered().await;
    assert_eq!(delivered.get(&test_table("orders")).map(Vec::len), Some(1));
    assert_eq!(delivered.get(&test_table("users")).map(Vec::len), Some(1));

    streamer.close().await.expect("close");
}

#[tokio::test(flavor = "multi_thread")]
async fn rows_enqueued_before_start_are_delivered() {
    init_tracing();

    let client = ScriptedInsertClient::new();
    let mut streamer = Streamer::new(test_config(2, 50), client.clone()).expect("valid config");

    // The size trigger fires before any worker exists; the batch waits in the
    // work queue until the pipeline starts.
    streamer.enqueue(test_row("events")).await.expect("enqueue");
    streamer.enqueue(test_row("events")).await.expect("enqueue");
    assert_eq!(client.call_count().await, 0);

    streamer.start().expect("start");

    wait_until(WAIT, || {
        let client = client.clone();
        async move { client.delivered_count().await == 2 }
    })
    .await;

    streamer.close().await.expect("close");
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_rows_are_reported_and_valid_rows_delivered() {
    init_tracing();

    let client = ScriptedInsertClient::new();
    client
        .push_response(ScriptedResponse::RowErrors(vec![(
            1,
            RowErrorKind::NonRetriable,
        )]))
        .await;

    let mut streamer = Streamer::new(test_config(3, 50), client.clone()).expect("valid config");
    streamer.start().expect("start");
    let reporter = streamer.reporter();

    for _ in 0..3 {
        streamer.enqueue(test_row("events")).await.expect("enqueue");
    }

    let failure = tokio::time::timeout(WAIT, reporter.recv())
        .await
        .expect("failure should be reported");

    assert_eq!(failure.kind, FailureKind::InvalidRows);
    assert_eq!(failure.row_count(), 1);
    let row_error = failure.rows[0].error.as_ref().expect("row-level error");
    assert_eq!(row_error.reason, "invalid");

    assert_eq!(client.delivered_count().await, 2);

    streamer.close().await.expect("close");
    // The invalid row never goes back through the retry path.
    assert_eq!(client.call_count().await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn transport_failures_retry_until_the_budget_is_spent() {
    init_tracing();

    let client = ScriptedInsertClient::new();
    client
        .push_responses([
            ScriptedResponse::Transport,
            ScriptedResponse::Transport,
            ScriptedResponse::Transport,
        ])
        .await;

    let mut config = test_config(1, 50);
    config.retry.max_retries = 2;
    let mut streamer = Streamer::new(config, client.clone()).expect("valid config");
    streamer.start().expect("start");
    let reporter = streamer.reporter();

    streamer.enqueue(test_row("events")).await.expect("enqueue");

    let failure = tokio::time::timeout(WAIT, reporter.recv())
        .await
        .expect("failure should be reported");

    assert_eq!(failure.kind, FailureKind::RetriesExhausted);
    assert_eq!(failure.row_count(), 1);
    // One initial submission plus two retries, each recorded with its error.
    assert_eq!(failure.attempts.len(), 3);
    assert!(failure.attempts.iter().all(|a| a.error.is_some()));
    assert_eq!(client.call_count().await, 3);

    streamer.close().await.expect("close");
    assert_eq!(client.delivered_count().await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_requests_are_terminal_without_burning_the_retry_budget() {
    init_tracing();

    let client = ScriptedInsertClient::new();
    client.push_response(ScriptedResponse::Rejected).await;

    let mut config = test_config(2, 50);
    config.retry.max_retries = 2;
    let mut streamer = Streamer::new(config, client.clone()).expect("valid config");
    streamer.start().expect("start");
    let reporter = streamer.reporter();

    streamer.enqueue(test_row("events")).await.expect("enqueue");
    streamer.enqueue(test_row("events")).await.expect("enqueue");

    let failure = tokio::time::timeout(WAIT, reporter.recv())
        .await
        .expect("rejection should be reported");

    assert_eq!(failure.kind, FailureKind::InvalidRows);
    assert_eq!(failure.row_count(), 2);
    assert_eq!(failure.attempts.len(), 1);
    assert!(failure.attempts[0].error.is_some());

    // Leave room for several retry intervals; no resubmission may happen.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.call_count().await, 1);

    streamer.close().await.expect("close");
    assert_eq!(client.delivered_count().await, 0);
    assert!(reporter.try_recv().await.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn retriable_row_failures_shrink_the_retried_batch() {
    init_tracing();

    let client = ScriptedInsertClient::new();
    client
        .push_response(ScriptedResponse::RowErrors(vec![(
            0,
            RowErrorKind::Retriable,
        )]))
        .await;

    let mut streamer = Streamer::new(test_config(3, 50), client.clone()).expect("valid config");
    streamer.start().expect("start");

    for _ in 0..3 {
        streamer.enqueue(test_row("events")).await.expect("enqueue");
    }

    wait_until(WAIT, || {
        let client = client.clone();
        async move { client.delivered_count().await == 3 }
    })
    .await;

    // Only the failed row is resubmitted.
    assert_eq!(client.call_sizes().await, vec![3, 1]);

    streamer.close().await.expect("close");
    assert!(streamer.reporter().is_empty().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn close_reports_parked_retries_as_abandoned() {
    init_tracing();

    let client = ScriptedInsertClient::new();
    client.push_response(ScriptedResponse::Transport).await;

    let mut config = test_config(1, 50);
    config.retry.retry_interval_ms = 3_600_000;
    config.shutdown_grace_ms = 100;
    let mut streamer = Streamer::new(config, client.clone()).expect("valid config");
    streamer.start().expect("start");
    let reporter = streamer.reporter();

    streamer.enqueue(test_row("events")).await.expect("enqueue");

    // Let the failed batch reach the retry runner before closing.
    wait_until(WAIT, || {
        let client = client.clone();
        async move { client.call_count().await == 1 }
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    streamer.close().await.expect("close");

    let failure = reporter.try_recv().await.expect("abandonment is reported");
    assert_eq!(failure.kind, FailureKind::ShutdownAbandoned);
    assert_eq!(failure.row_count(), 1);
    assert_eq!(failure.attempts.len(), 1);

    // Abandonment is reported exactly once per batch.
    assert!(reporter.try_recv().await.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn enqueue_after_close_fails_with_pool_closed() {
    init_tracing();

    let client = ScriptedInsertClient::new();
    let mut streamer = Streamer::new(test_config(10, 50), client).expect("valid config");
    streamer.start().expect("start");
    streamer.close().await.expect("close");

    let err = streamer
        .enqueue(test_row("events"))
        .await
        .expect_err("pool is closed");
    assert_eq!(err.kind(), ErrorKind::PoolClosed);

    let err = streamer.start().expect_err("cannot restart");
    assert_eq!(err.kind(), ErrorKind::PoolClosed);
}

#[tokio::test(flavor = "multi_thread")]
async fn close_is_idempotent() {
    init_tracing();

    let client = ScriptedInsertClient::new();
    let mut streamer = Streamer::new(test_config(10, 50), client).expect("valid config");
    streamer.start().expect("start");

    streamer.close().await.expect("first close");
    streamer.close().await.expect("second close");
}

#[tokio::test(flavor = "multi_thread")]
async fn close_without_start_does_not_hang() {
    init_tracing();

    let client = ScriptedInsertClient::new();
    let mut streamer = Streamer::new(test_config(10, 50), client.clone()).expect("valid config");
    let reporter = streamer.reporter();

    streamer.enqueue(test_row("events")).await.expect("enqueue");
    streamer.close().await.expect("close");

    // With no workers the flushed batch is abandoned, not lost silently.
    let failure = reporter.try_recv().await.expect("abandonment is reported");
    assert_eq!(failure.kind, FailureKind::ShutdownAbandoned);
    assert_eq!(client.call_count().await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn close_flushes_the_partial_batch() {
    init_tracing();

    let client = ScriptedInsertClient::new();
    let mut streamer = Streamer::new(test_config(100, 60_000), client.clone()).expect("valid config");
    streamer.start().expect("start");

    streamer.enqueue(test_row("events")).await.expect("enqueue");
    streamer.enqueue(test_row("events")).await.expect("enqueue");

    streamer.close().await.expect("close");

    assert_eq!(client.delivered_count().await, 2);
    assert_eq!(client.call_sizes().await, vec![2]);
}

#[tokio::test(flavor = "multi_thread")]
async fn every_row_is_delivered_or_reported_under_mixed_failures() {
    init_tracing();

    let client = ScriptedInsertClient::new();
    // First batch: one permanently invalid row among three. Second batch:
    // transport failures until the budget is spent.
    client
        .push_responses([
            ScriptedResponse::RowErrors(vec![(1, RowErrorKind::NonRetriable)]),
            ScriptedResponse::Transport,
            ScriptedResponse::Transport,
        ])
        .await;

    let mut config = test_config(3, 50);
    config.retry.max_retries = 1;
    let mut streamer = Streamer::new(config, client.clone()).expect("valid config");
    streamer.start().expect("start");
    let reporter = streamer.reporter();

    let mut reported = 0usize;

    for _ in 0..3 {
        streamer.enqueue(test_row("events")).await.expect("enqueue");
    }
    let failure = tokio::time::timeout(WAIT, reporter.recv())
        .await
        .expect("invalid row should be reported");
    assert_eq!(failure.kind, FailureKind::InvalidRows);
    reported += failure.row_count();

    for _ in 0..3 {
        streamer.enqueue(test_row("events")).await.expect("enqueue");
    }
    let failure = tokio::time::timeout(WAIT, reporter.recv())
        .await
        .expect("exhausted batch should be reported");
    assert_eq!(failure.kind, FailureKind::RetriesExhausted);
    reported += failure.row_count();

    streamer.close().await.expect("close");

    // Every enqueued row ends up delivered or reported, never both or neither.
    assert_eq!(client.delivered_count().await + reported, 6);
    assert!(reporter.try_recv().await.is_none());
}

#[cfg(feature = "http")]
#[test]
fn pipeline_transport_selector_reaches_the_http_client() {
    use rowstream::client::http::{HttpClientConfig, HttpInsertClient};
    use rowstream::config::NetworkTransport;

    let mut config = test_config(10, 50);
    config.transport = NetworkTransport::Ipv4Only;

    let streamer: Streamer<HttpInsertClient> = Streamer::with_http(
        config,
        HttpClientConfig {
            base_url: "https://example.com".to_string(),
            bearer_token: None,
            transport: NetworkTransport::DualStack,
            request_timeout_ms: 1_000,
        },
    )
    .expect("client should build");

    // The pipeline-level selector wins over the client config.
    assert_eq!(streamer.client().transport(), NetworkTransport::Ipv4Only);
}

#[tokio::test(flavor = "multi_thread")]
async fn batches_never_exceed_the_size_limit() {
    init_tracing();

    let client = ScriptedInsertClient::new();
    let mut streamer = Streamer::new(test_config(3, 60_000), client.clone()).expect("valid config");
    streamer.start().expect("start");

    for _ in 0..10 {
        streamer.enqueue(test_row("events")).await.expect("enqueue");
    }

    streamer.close().await.expect("close");

    assert_eq!(client.delivered_count().await, 10);
    assert!(
        client.call_sizes().await.iter().all(|size| *size <= 3),
        "no insert call may exceed the configured batch size"
    );
}
