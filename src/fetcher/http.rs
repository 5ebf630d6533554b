//! HTTP page fetcher
//!
//! Issues one paginated `GET` per page with:
//! - rate limiter admission before every attempt (retries included)
//! - `Retry-After` handling on 429, fractional seconds or HTTP dates
//! - exponential backoff on timeouts and 5xx, bounded by the retry policy
//! - immediate failure on any other 4xx

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::parser::parse_page;
use super::retry_formatter::{extract_error_type, RetryContext, RetryErrorType};
use super::{Cursor, FetcherError, FetcherResult, Page, PageFetcher};
use crate::config::ApiConfig;
use crate::ingest::config::RetryPolicy;
use crate::ingest::rate_limit::LimiterScope;
use crate::metrics::{record_retry_backoff, HttpRequestMetrics};
use crate::shutdown::{get_global_shutdown, SharedShutdown};
use crate::PartitionSpec;

/// Longest `Retry-After` honoured; larger values are clamped.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Longest error body kept in a [`FetcherError::FatalRequest`].
const MAX_ERROR_BODY: usize = 512;

/// Build the shared client with the configured timeouts.
pub fn build_http_client(api: &ApiConfig) -> FetcherResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(api.request_timeout_secs))
        .connect_timeout(Duration::from_secs(api.connect_timeout_secs))
        .user_agent(concat!("record-ingest/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| FetcherError::Client(format!("failed to build HTTP client: {e}")))
}

/// Parse `Retry-After` as delta-seconds (fractions allowed) or an HTTP date.
///
/// Returns `None` when the header is missing or unusable so the caller can
/// substitute its default.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(secs) = value.parse::<f64>() {
        return Duration::try_from_secs_f64(secs)
            .ok()
            .map(|d| d.min(MAX_RETRY_AFTER));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?;
    (at.with_timezone(&Utc) - Utc::now())
        .to_std()
        .ok()
        .map(|d| d.min(MAX_RETRY_AFTER))
}

/// Fetches pages from the configured upstream API.
pub struct HttpFetcher {
    client: Arc<Client>,
    api: ApiConfig,
    url: String,
    limiters: LimiterScope,
    retry: RetryPolicy,
    shutdown: Option<SharedShutdown>,
}

impl HttpFetcher {
    /// Create a fetcher sharing `client` and drawing admission from `limiters`.
    pub fn new(client: Arc<Client>, api: ApiConfig, limiters: impl Into<LimiterScope>) -> Self {
        let url = api.url();
        Self {
            client,
            api,
            url,
            limiters: limiters.into(),
            retry: RetryPolicy::default(),
            shutdown: get_global_shutdown(),
        }
    }

    /// Build client and fetcher from configuration.
    pub fn from_config(
        api: &ApiConfig,
        limiters: LimiterScope,
        retry: RetryPolicy,
    ) -> FetcherResult<Self> {
        let client = Arc::new(build_http_client(api)?);
        Ok(Self::new(client, api.clone(), limiters).with_retry_policy(retry))
    }

    /// Override the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Let `shutdown` interrupt backoff sleeps.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Query string for one page of a partition.
    pub fn query_params(&self, partition: &PartitionSpec, cursor: &Cursor) -> Vec<(String, String)> {
        let api = &self.api;
        let range = &partition.date_range;
        let mut params: Vec<(String, String)> = api
            .extra_params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut push = |name: &str, value: String| {
            if !name.is_empty() {
                params.push((name.to_string(), value));
            }
        };
        push(&api.source_param, partition.source.clone());
        push(&api.start_param, range.start.format(&api.date_format).to_string());
        push(&api.end_param, range.end.format(&api.date_format).to_string());
        push(&api.limit_param, api.page_size.to_string());
        match cursor {
            Cursor::Page(n) => push(&api.page_param, n.to_string()),
            Cursor::Token(token) => push(&api.cursor_param, token.clone()),
        }
        params
    }

    /// Sleep before the next attempt unless shutdown is requested first.
    async fn wait_before_retry(&self, attempt: u32, context: RetryContext) -> FetcherResult<()> {
        let delay = self.retry.backoff(attempt.saturating_sub(1));
        let context = context.with_backoff(delay);
        warn!(
            partition_id = %context.partition_id,
            cursor = %context.cursor,
            attempt = attempt,
            max_attempts = self.retry.max_attempts,
            error = %context.error_message,
            "{}",
            context.format_retry()
        );
        record_retry_backoff(delay, attempt);

        match &self.shutdown {
            Some(shutdown) => {
                tokio::select! {
                    _ = sleep(delay) => Ok(()),
                    _ = shutdown.wait_for_shutdown() => {
                        info!(partition_id = %context.partition_id, "Shutdown requested during backoff");
                        Err(FetcherError::Cancelled)
                    }
                }
            }
            None => {
                sleep(delay).await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch_page(
        &self,
        partition: &PartitionSpec,
        cursor: Option<&Cursor>,
    ) -> FetcherResult<Page> {
        let cursor = cursor.cloned().unwrap_or_else(Cursor::first);
        let limiter = self.limiters.limiter_for(&partition.id);
        let params = self.query_params(partition, &cursor);
        let max_attempts = self.retry.max_attempts.max(1);
        let context_for = |attempt: u32, kind: RetryErrorType, message: String| {
            RetryContext::new(attempt, max_attempts, kind)
                .with_partition(&partition.id, cursor.to_string(), Some(partition.date_range))
                .with_error(message, &self.url)
        };

        let mut last_failure: Option<RetryContext> = None;

        for attempt in 1..=max_attempts {
            limiter.acquire().await;

            let metrics = HttpRequestMetrics::start(&self.api.endpoint, attempt);
            debug!(
                partition_id = %partition.id,
                cursor = %cursor,
                attempt = attempt,
                "GET {}",
                self.url
            );

            let response = match self.client.get(&self.url).query(&params).send().await {
                Ok(response) => response,
                Err(e) => {
                    metrics.record_network_error();
                    let context =
                        context_for(attempt, extract_error_type(None, Some(&e)), e.to_string());
                    if attempt < max_attempts {
                        self.wait_before_retry(attempt, context.clone()).await?;
                    }
                    last_failure = Some(context);
                    continue;
                }
            };

            let status = response.status();
            metrics.record_complete(status.as_u16());

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = parse_retry_after(response.headers());
                let applied = limiter.notify_rate_limited(retry_after).await;
                warn!(
                    partition_id = %partition.id,
                    cursor = %cursor,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    retry_after_ms = applied.as_millis(),
                    header_present = retry_after.is_some(),
                    "Rate limited (429)"
                );
                last_failure = Some(context_for(
                    attempt,
                    RetryErrorType::RateLimit,
                    "HTTP 429 Too Many Requests".to_string(),
                ));
                continue;
            }

            if !status.is_success() {
                let kind = extract_error_type(Some(status), None);
                if kind.is_retryable() {
                    let context = context_for(attempt, kind, format!("HTTP {status}"));
                    if attempt < max_attempts {
                        self.wait_before_retry(attempt, context.clone()).await?;
                    }
                    last_failure = Some(context);
                    continue;
                }

                let mut message = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "<unreadable body>".to_string());
                if message.len() > MAX_ERROR_BODY {
                    let mut end = MAX_ERROR_BODY;
                    while !message.is_char_boundary(end) {
                        end -= 1;
                    }
                    message.truncate(end);
                }
                let context = context_for(attempt, kind, format!("HTTP {status}: {message}"));
                warn!(
                    partition_id = %partition.id,
                    cursor = %cursor,
                    status = status.as_u16(),
                    "Request rejected ({}), not retrying. {}",
                    kind.description(),
                    kind.suggestion()
                );
                debug!("{}", context.format_failure());
                return Err(FetcherError::FatalRequest {
                    status: status.as_u16(),
                    message,
                });
            }

            let bytes = match response.bytes().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    let context =
                        context_for(attempt, extract_error_type(None, Some(&e)), e.to_string());
                    if attempt < max_attempts {
                        self.wait_before_retry(attempt, context.clone()).await?;
                    }
                    last_failure = Some(context);
                    continue;
                }
            };

            let body: Value = serde_json::from_slice(&bytes).map_err(|e| {
                FetcherError::InvalidResponse(format!("body is not valid JSON: {e}"))
            })?;

            if attempt > 1 {
                info!(
                    partition_id = %partition.id,
                    cursor = %cursor,
                    attempt = attempt,
                    "Page fetched after retry"
                );
            }
            return parse_page(&body, &self.api, partition, &cursor, Utc::now());
        }

        let context = last_failure.unwrap_or_else(|| {
            context_for(
                max_attempts,
                RetryErrorType::NetworkGeneric,
                "no attempt completed".to_string(),
            )
        });
        warn!("{}", context.format_failure());

        if context.error_type == RetryErrorType::RateLimit {
            Err(FetcherError::RateLimitExceeded {
                attempts: max_attempts,
            })
        } else {
            Err(FetcherError::TransientFailure {
                attempts: max_attempts,
                message: context.error_message,
            })
        }
    }

    fn base_url(&self) -> &str {
        &self.api.base_url
    }
}
