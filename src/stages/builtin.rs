//! Built-in stage implementations.
//!
//! `ProviderStage` adapts an external `EnrichmentProvider` to the stage
//! contract; the two aggregation stages are self-contained.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::models::{DocumentType, WorkingDocument};

use super::provider::{EnrichmentProvider, ProviderContext};
use super::{Stage, StageError, StageOutput};

use DocumentType::{Docket, LeadOpinion, Opinion, Other};

/// Stage backed by an external enrichment provider.
pub struct ProviderStage {
    name: &'static str,
    owned: &'static [&'static str],
    expected_types: &'static [DocumentType],
    /// Field that must already be present, or the stage skips itself.
    requires: Option<&'static str>,
    provider: Arc<dyn EnrichmentProvider>,
}

impl ProviderStage {
    pub fn court_resolution(provider: Arc<dyn EnrichmentProvider>) -> Self {
        Self {
            name: "court-resolution",
            owned: &["court_name", "court_id"],
            expected_types: &[Opinion, Docket, LeadOpinion, Other],
            requires: None,
            provider,
        }
    }

    pub fn citation_extraction(provider: Arc<dyn EnrichmentProvider>) -> Self {
        Self {
            name: "citation-extraction",
            owned: &["citations"],
            expected_types: &[Opinion, LeadOpinion],
            requires: None,
            provider,
        }
    }

    pub fn citation_validation(provider: Arc<dyn EnrichmentProvider>) -> Self {
        Self {
            name: "citation-validation",
            owned: &["citations_valid", "citation_errors"],
            expected_types: &[Opinion, LeadOpinion],
            requires: Some("citations"),
            provider,
        }
    }

    pub fn reporter_normalization(provider: Arc<dyn EnrichmentProvider>) -> Self {
        Self {
            name: "reporter-normalization",
            owned: &["reporters"],
            expected_types: &[Opinion, LeadOpinion],
            requires: Some("citations"),
            provider,
        }
    }

    pub fn judge_enhancement(provider: Arc<dyn EnrichmentProvider>) -> Self {
        Self {
            name: "judge-enhancement",
            owned: &["judges", "panel"],
            expected_types: &[Opinion, Docket, LeadOpinion],
            requires: None,
            provider,
        }
    }

    pub fn structure_analysis(provider: Arc<dyn EnrichmentProvider>) -> Self {
        Self {
            name: "structure-analysis",
            owned: &["structure"],
            expected_types: &[Opinion, LeadOpinion],
            requires: None,
            provider,
        }
    }

    pub fn keyword_extraction(provider: Arc<dyn EnrichmentProvider>) -> Self {
        Self {
            name: "keyword-extraction",
            owned: &["keywords"],
            expected_types: &[Opinion, Docket, LeadOpinion],
            requires: None,
            provider,
        }
    }
}

#[async_trait]
impl Stage for ProviderStage {
    fn name(&self) -> &str {
        self.name
    }

    fn owned_fields(&self) -> &[&str] {
        self.owned
    }

    fn is_expected(&self, document_type: DocumentType) -> bool {
        self.expected_types.contains(&document_type)
    }

    async fn apply(&self, doc: &WorkingDocument) -> Result<StageOutput, StageError> {
        // A document type outside this stage's scope is skipped, not failed;
        // there is no citation work to do on a docket sheet.
        if !self.expected_types.contains(&doc.candidate.document_type) {
            return Ok(StageOutput::Skipped);
        }
        if let Some(required) = self.requires {
            if doc.field(required).is_none() {
                return Ok(StageOutput::Skipped);
            }
        }

        let context = ProviderContext {
            document_type: doc.candidate.document_type,
            court: &doc.candidate.court,
            case_name: &doc.candidate.case_name,
            fields: &doc.fields,
        };

        let fields = self
            .provider
            .enrich(&doc.candidate.raw_content, &context)
            .await?;

        Ok(StageOutput::Fields(fields))
    }
}

/// Copies a whitelist of source metadata keys into the enriched field map so
/// downstream consumers see them without reaching back to the source record.
pub struct MetadataCarryStage {
    carried_keys: &'static [&'static str],
}

impl Default for MetadataCarryStage {
    fn default() -> Self {
        Self {
            carried_keys: &["nature_of_suit", "precedential_status", "source_court_url"],
        }
    }
}

#[async_trait]
impl Stage for MetadataCarryStage {
    fn name(&self) -> &str {
        "metadata-carry"
    }

    fn owned_fields(&self) -> &[&str] {
        &["source_metadata"]
    }

    fn is_expected(&self, _document_type: DocumentType) -> bool {
        true
    }

    async fn apply(&self, doc: &WorkingDocument) -> Result<StageOutput, StageError> {
        let mut carried = Map::new();
        for key in self.carried_keys {
            if let Some(value) = doc.candidate.source_metadata.get(*key) {
                carried.insert((*key).to_string(), value.clone());
            }
        }

        let mut fields = Map::new();
        fields.insert("source_metadata".to_string(), Value::Object(carried));
        Ok(StageOutput::Fields(fields))
    }
}

/// Flattens keywords and citations produced by earlier stages into one
/// `search_terms` list for the search index. Not expected for any document
/// type; it only aggregates what upstream stages produced.
pub struct KeywordAggregationStage;

#[async_trait]
impl Stage for KeywordAggregationStage {
    fn name(&self) -> &str {
        "keyword-aggregation"
    }

    fn owned_fields(&self) -> &[&str] {
        &["search_terms"]
    }

    fn is_expected(&self, _document_type: DocumentType) -> bool {
        false
    }

    async fn apply(&self, doc: &WorkingDocument) -> Result<StageOutput, StageError> {
        let mut terms: Vec<String> = Vec::new();
        for source in ["keywords", "citations"] {
            if let Some(Value::Array(values)) = doc.field(source) {
                terms.extend(
                    values
                        .iter()
                        .filter_map(|v| v.as_str())
                        .map(|s| s.to_string()),
                );
            }
        }

        if terms.is_empty() {
            return Ok(StageOutput::Skipped);
        }

        terms.sort();
        terms.dedup();

        let mut fields = Map::new();
        fields.insert("search_terms".to_string(), serde_json::json!(terms));
        Ok(StageOutput::Fields(fields))
    }
}
