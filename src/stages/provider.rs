//! Enrichment provider seam.
//!
//! The actual enrichment algorithms (citation parsing, court resolution,
//! judge lookup, ...) live outside this crate. Each is exposed to the
//! pipeline as a provider: text plus context in, structured fields out.

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::DocumentType;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("{0}")]
    Failed(String),
}

/// Read-only view of the document handed to a provider.
#[derive(Debug)]
pub struct ProviderContext<'a> {
    pub document_type: DocumentType,
    pub court: &'a str,
    pub case_name: &'a str,
    /// Fields produced by earlier stages.
    pub fields: &'a Map<String, Value>,
}

/// A synchronous-in-spirit enrichment function behind an async seam.
#[async_trait]
pub trait EnrichmentProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn enrich(
        &self,
        text: &str,
        context: &ProviderContext<'_>,
    ) -> Result<Map<String, Value>, ProviderError>;
}

/// Provider that produces nothing. Used wherever a real provider has not
/// been registered, so the stage still runs and succeeds with empty output.
pub struct NullProvider {
    name: &'static str,
}

impl NullProvider {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

#[async_trait]
impl EnrichmentProvider for NullProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn enrich(
        &self,
        _text: &str,
        _context: &ProviderContext<'_>,
    ) -> Result<Map<String, Value>, ProviderError> {
        Ok(Map::new())
    }
}
