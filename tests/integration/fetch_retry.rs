//! HTTP status handling and retry behavior against a mock upstream

use crate::support::{items, partition, temp_store};
use httpmock::prelude::*;
use record_ingest::config::ApiConfig;
use record_ingest::fetcher::{Cursor, FetcherError, HttpFetcher, PageFetcher};
use record_ingest::ingest::config::RetryPolicy;
use record_ingest::ingest::rate_limit::LimiterScope;
use record_ingest::ingest::{Orchestrator, PartitionStatus, RateLimiter};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn api(server: &MockServer) -> ApiConfig {
    ApiConfig {
        base_url: server.base_url(),
        endpoint: "/records".to_string(),
        page_size: 2,
        content_field: Some("text".to_string()),
        ..ApiConfig::default()
    }
}

fn fetcher(server: &MockServer) -> HttpFetcher {
    let limiter = Arc::new(RateLimiter::new(100, Duration::from_secs(1)));
    HttpFetcher::from_config(
        &api(server),
        LimiterScope::from(limiter),
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        },
    )
    .unwrap()
}

#[tokio::test]
async fn test_successful_page_is_parsed() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/records")
                .query_param("source", "news")
                .query_param("start_date", "2024-03-01")
                .query_param("end_date", "2024-03-01")
                .query_param("page", "1")
                .query_param("limit", "2");
            then.status(200).json_body(json!({
                "items": [
                    {"id": "a", "text": "first"},
                    {"id": 7, "text": "second"},
                    {"id": "c", "text": "   "}
                ],
                "count": 5
            }));
        })
        .await;

    let page = fetcher(&server)
        .fetch_page(&partition("p1"), None)
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(page.records.len(), 2);
    assert_eq!(page.records[0].external_id.as_deref(), Some("a"));
    assert_eq!(page.records[1].external_id.as_deref(), Some("7"));
    assert_eq!(page.malformed, 1);
    assert!(page.has_more);
    assert_eq!(page.next_cursor, Some(Cursor::Page(2)));
}

#[tokio::test]
async fn test_429_honours_fractional_retry_after_then_gives_up() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/records");
            then.status(429).header("Retry-After", "0.1");
        })
        .await;

    let start = Instant::now();
    let result = fetcher(&server).fetch_page(&partition("p1"), None).await;

    assert_eq!(result, Err(FetcherError::RateLimitExceeded { attempts: 3 }));
    assert_eq!(mock.hits_async().await, 3);
    // Two waits between three attempts.
    assert!(start.elapsed() >= Duration::from_millis(200));
}

#[tokio::test]
async fn test_server_errors_are_retried_until_exhausted() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/records");
            then.status(503).body("maintenance");
        })
        .await;

    let result = fetcher(&server).fetch_page(&partition("p1"), None).await;

    match result {
        Err(FetcherError::TransientFailure { attempts, message }) => {
            assert_eq!(attempts, 3);
            assert!(message.contains("503"), "unexpected message: {message}");
        }
        other => panic!("expected transient failure, got {other:?}"),
    }
    assert_eq!(mock.hits_async().await, 3);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/records");
            then.status(404).body("unknown source");
        })
        .await;

    let result = fetcher(&server).fetch_page(&partition("p1"), None).await;

    assert_eq!(
        result,
        Err(FetcherError::FatalRequest {
            status: 404,
            message: "unknown source".to_string(),
        })
    );
    assert_eq!(mock.hits_async().await, 1);
}

#[tokio::test]
async fn test_auth_failure_is_not_retried() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/records");
            then.status(401).body("missing token");
        })
        .await;

    let result = fetcher(&server).fetch_page(&partition("p1"), None).await;

    assert_eq!(
        result,
        Err(FetcherError::FatalRequest {
            status: 401,
            message: "missing token".to_string(),
        })
    );
    assert_eq!(mock.hits_async().await, 1);
}

#[tokio::test]
async fn test_unparseable_body_is_invalid_response() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/records");
            then.status(200).body("<html>oops</html>");
        })
        .await;

    let result = fetcher(&server).fetch_page(&partition("p1"), None).await;
    assert!(matches!(result, Err(FetcherError::InvalidResponse(_))));
}

#[tokio::test]
async fn test_orchestrated_run_over_http() {
    let server = MockServer::start_async().await;
    let page = |n: &str, texts: Vec<String>, more: bool| {
        let body = json!({
            "items": texts.iter().map(|t| json!({"id": t, "text": t})).collect::<Vec<_>>(),
            "has_more": more,
        });
        (n.to_string(), body)
    };
    for (n, body) in [
        page("1", items("x", 0, 2), true),
        page("2", items("x", 1, 2), false),
    ] {
        server
            .mock_async(move |when, then| {
                when.method(GET).path("/records").query_param("page", n.as_str());
                then.status(200).json_body(body);
            })
            .await;
    }

    let (_dir, store) = temp_store().await;
    let report = Orchestrator::new(Arc::new(fetcher(&server)), store.clone())
        .with_batch_size(2)
        .run(&[partition("p1")])
        .await;

    let p = report.partition("p1").unwrap();
    assert_eq!(p.status, PartitionStatus::Completed);
    assert_eq!(p.counts.fetched, 4);
    assert_eq!(p.counts.new, 3);
    assert_eq!(p.counts.duplicate, 1);
    assert_eq!(store.record_count().await.unwrap(), 3);
}
