//! Downstream search index push.
//!
//! The index receives finalized documents after storage, fire-and-forget:
//! a push failure is logged and retried on its own schedule, never fed back
//! into the pipeline outcome.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use url::Url;

use crate::models::EnrichedDocument;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("index rejected document: HTTP {0}")]
    Rejected(u16),
    #[error("invalid index url: {0}")]
    Url(#[from] url::ParseError),
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn push(&self, document: &EnrichedDocument) -> Result<(), SearchError>;
}

/// Index client that drops everything. Used when no index is configured.
pub struct NullSearchIndex;

#[async_trait]
impl SearchIndex for NullSearchIndex {
    async fn push(&self, _document: &EnrichedDocument) -> Result<(), SearchError> {
        Ok(())
    }
}

/// HTTP bulk-index client with a small bounded retry of its own.
pub struct HttpSearchIndex {
    client: Client,
    endpoint: Url,
    max_attempts: u32,
}

impl HttpSearchIndex {
    pub fn new(endpoint: &str, timeout: Duration, max_attempts: u32) -> Result<Self, SearchError> {
        let client = Client::builder()
            .user_agent(concat!("lexingest/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: Url::parse(endpoint)?,
            max_attempts: max_attempts.max(1),
        })
    }
}

#[async_trait]
impl SearchIndex for HttpSearchIndex {
    async fn push(&self, document: &EnrichedDocument) -> Result<(), SearchError> {
        let mut last: Option<SearchError> = None;

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(250 << attempt)).await;
            }

            let result = self
                .client
                .post(self.endpoint.clone())
                .json(document)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => last = Some(SearchError::Rejected(response.status().as_u16())),
                Err(e) => last = Some(SearchError::Http(e)),
            }
        }

        Err(last.expect("at least one attempt"))
    }
}
