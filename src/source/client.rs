//! HTTP client for the paginated court document API.
//!
//! All requests pass through a shared token bucket; server-signaled
//! throttling (429/503 with Retry-After) is honored by sleeping the server
//! hint and then re-acquiring, so the effective pause is always at least as
//! long as both the hint and the bucket's own wait. Transient failures are
//! retried with exponential backoff before a page fetch is reported as a
//! batch-level error.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::models::CandidateDocument;
use crate::rate_limit::TokenBucket;

/// Filter parameters for a batch run, forwarded to the source API.
#[derive(Debug, Clone, Default)]
pub struct SourceQuery {
    pub court: Option<String>,
    pub filed_after: Option<NaiveDate>,
    pub filed_before: Option<NaiveDate>,
}

/// One page of candidate documents plus the continuation cursor.
///
/// An absent or empty `next_cursor` is the termination signal; the page
/// count is never assumed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourcePage {
    #[serde(default)]
    pub results: Vec<CandidateDocument>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

impl SourcePage {
    /// Whether this page ends the pagination.
    pub fn is_last(&self) -> bool {
        self.next_cursor.as_deref().map_or(true, str::is_empty)
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },
    #[error("invalid source url: {0}")]
    Url(#[from] url::ParseError),
    #[error("page fetch failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

/// Retry policy for transient fetch failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Exponential backoff delay for the given attempt (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        exp.min(self.max_delay)
    }
}

/// Abstraction over the paginated source, so the batch runner can be driven
/// by a scripted source in tests.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch_page(
        &self,
        query: &SourceQuery,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<SourcePage, SourceError>;
}

/// Configuration for the HTTP source client.
#[derive(Debug, Clone)]
pub struct SourceClientConfig {
    pub base_url: String,
    pub api_token: String,
    pub request_timeout: Duration,
    pub retry: RetryConfig,
}

/// Rate-limited client for the court document API.
#[derive(Clone)]
pub struct HttpDocumentSource {
    client: Client,
    base_url: Url,
    api_token: String,
    bucket: TokenBucket,
    retry: RetryConfig,
}

impl HttpDocumentSource {
    pub fn new(config: SourceClientConfig, bucket: TokenBucket) -> Result<Self, SourceError> {
        let client = Client::builder()
            .user_agent(concat!("lexingest/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            client,
            base_url: Url::parse(&config.base_url)?,
            api_token: config.api_token,
            bucket,
            retry: config.retry,
        })
    }

    fn page_url(
        &self,
        query: &SourceQuery,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Url, SourceError> {
        let mut url = self.base_url.join("documents")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("page_size", &page_size.to_string());
            if let Some(court) = &query.court {
                pairs.append_pair("court", court);
            }
            if let Some(after) = &query.filed_after {
                pairs.append_pair("filed_after", &after.format("%Y-%m-%d").to_string());
            }
            if let Some(before) = &query.filed_before {
                pairs.append_pair("filed_before", &before.format("%Y-%m-%d").to_string());
            }
            if let Some(cursor) = cursor {
                pairs.append_pair("cursor", cursor);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl DocumentSource for HttpDocumentSource {
    async fn fetch_page(
        &self,
        query: &SourceQuery,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<SourcePage, SourceError> {
        let url = self.page_url(query, cursor, page_size)?;
        let mut attempt = 0u32;
        let mut last_error = String::new();

        loop {
            // The bucket wait is the only blocking point exposed here.
            self.bucket.acquire(1).await;

            let response = match self
                .client
                .get(url.clone())
                .bearer_auth(&self.api_token)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_error = e.to_string();
                    attempt += 1;
                    if attempt >= self.retry.max_attempts {
                        return Err(SourceError::Exhausted {
                            attempts: attempt,
                            last_error,
                        });
                    }
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!("fetch {} failed ({}), retrying in {:?}", url, last_error, delay);
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE
            {
                // Server throttling is not a failed attempt; honor the hint
                // in full, then go back through the bucket.
                let hint = retry_after_hint(&response).unwrap_or_else(|| self.retry.delay_for(attempt));
                tracing::warn!("source throttled ({}), waiting {:?}", status, hint);
                tokio::time::sleep(hint).await;
                continue;
            }

            if status.is_server_error() {
                last_error = format!("HTTP {}", status);
                attempt += 1;
                if attempt >= self.retry.max_attempts {
                    return Err(SourceError::Exhausted {
                        attempts: attempt,
                        last_error,
                    });
                }
                tokio::time::sleep(self.retry.delay_for(attempt)).await;
                continue;
            }

            if !status.is_success() {
                return Err(SourceError::Status {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }

            return Ok(response.json::<SourcePage>().await?);
        }
    }
}

/// Parse a Retry-After header: either delta-seconds or an HTTP date.
fn retry_after_hint(response: &reqwest::Response) -> Option<Duration> {
    let raw = response.headers().get("retry-after")?.to_str().ok()?;
    parse_retry_after(raw)
}

fn parse_retry_after(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let date = chrono::DateTime::parse_from_rfc2822(raw).ok()?;
    let delta = date.with_timezone(&chrono::Utc) - chrono::Utc::now();
    delta.to_std().ok()
}
