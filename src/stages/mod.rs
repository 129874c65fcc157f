//! Enrichment stage interface and the static stage registry.
//!
//! Stages run in a fixed, explicit order decided at startup. Each stage
//! declares the field keys it owns and whether it is expected for a given
//! document type; the expected set forms the completeness denominator.

mod builtin;
mod provider;

pub use builtin::{KeywordAggregationStage, MetadataCarryStage, ProviderStage};
pub use provider::{EnrichmentProvider, NullProvider, ProviderContext, ProviderError};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::{DocumentType, WorkingDocument};

#[derive(Debug, Error)]
pub enum StageError {
    #[error("stage timed out after {0:?}")]
    Timeout(Duration),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("{0}")]
    Other(String),
}

/// What a stage hands back to the orchestrator.
///
/// The orchestrator wraps this into a `StageResult` with timing, and merges
/// produced fields into the working document.
#[derive(Debug)]
pub enum StageOutput {
    /// Stage ran and produced these fields (possibly none).
    Fields(Map<String, Value>),
    /// Required input was absent; the stage did not run.
    Skipped,
}

/// One independent enhancement pass over a document.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    /// Field keys this stage owns. Its output is restricted to these keys,
    /// so it can never clobber fields owned by other stages.
    fn owned_fields(&self) -> &[&str];

    /// Whether this stage is expected to succeed for the given type.
    fn is_expected(&self, document_type: DocumentType) -> bool;

    /// Apply the stage. A stage failure is recorded, never raised past the
    /// orchestrator; downstream stages still run.
    async fn apply(&self, doc: &WorkingDocument) -> Result<StageOutput, StageError>;
}

/// Fixed, ordered list of stages. Built once at startup; changing the order
/// is a deployment-time decision.
pub struct StageRegistry {
    stages: Vec<Arc<dyn Stage>>,
}

/// Providers backing the standard stage sequence. Each defaults to a
/// `NullProvider` so the pipeline runs (producing nothing) until the real
/// collaborator is registered.
pub struct ProviderSet {
    pub court_resolution: Arc<dyn EnrichmentProvider>,
    pub citation_extraction: Arc<dyn EnrichmentProvider>,
    pub citation_validation: Arc<dyn EnrichmentProvider>,
    pub reporter_normalization: Arc<dyn EnrichmentProvider>,
    pub judge_enhancement: Arc<dyn EnrichmentProvider>,
    pub structure_analysis: Arc<dyn EnrichmentProvider>,
    pub keyword_extraction: Arc<dyn EnrichmentProvider>,
}

impl Default for ProviderSet {
    fn default() -> Self {
        Self {
            court_resolution: Arc::new(NullProvider::new("court-resolution")),
            citation_extraction: Arc::new(NullProvider::new("citation-extraction")),
            citation_validation: Arc::new(NullProvider::new("citation-validation")),
            reporter_normalization: Arc::new(NullProvider::new("reporter-normalization")),
            judge_enhancement: Arc::new(NullProvider::new("judge-enhancement")),
            structure_analysis: Arc::new(NullProvider::new("structure-analysis")),
            keyword_extraction: Arc::new(NullProvider::new("keyword-extraction")),
        }
    }
}

impl StageRegistry {
    /// Build a registry from an explicit ordered list.
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// The standard stage order for court documents.
    pub fn standard(providers: ProviderSet) -> Self {
        Self::new(vec![
            Arc::new(ProviderStage::court_resolution(providers.court_resolution)),
            Arc::new(ProviderStage::citation_extraction(
                providers.citation_extraction,
            )),
            Arc::new(ProviderStage::citation_validation(
                providers.citation_validation,
            )),
            Arc::new(ProviderStage::reporter_normalization(
                providers.reporter_normalization,
            )),
            Arc::new(ProviderStage::judge_enhancement(providers.judge_enhancement)),
            Arc::new(ProviderStage::structure_analysis(
                providers.structure_analysis,
            )),
            Arc::new(ProviderStage::keyword_extraction(
                providers.keyword_extraction,
            )),
            Arc::new(MetadataCarryStage::default()),
            Arc::new(KeywordAggregationStage),
        ])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Stage>> {
        self.stages.iter()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Names of stages expected for the given document type.
    pub fn expected_for(&self, document_type: DocumentType) -> BTreeSet<String> {
        self.stages
            .iter()
            .filter(|s| s.is_expected(document_type))
            .map(|s| s.name().to_string())
            .collect()
    }
}
