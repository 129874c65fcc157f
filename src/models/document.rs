//! Document models for court document ingestion and enrichment.
//!
//! A `CandidateDocument` is the raw unit fetched from the source API. It is
//! converted into a `WorkingDocument` while enrichment stages run, and ends
//! up as an `EnrichedDocument` once every stage has been applied.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of court document, as reported by the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentType {
    Opinion,
    Docket,
    LeadOpinion,
    Other,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Opinion => "opinion",
            Self::Docket => "docket",
            Self::LeadOpinion => "lead-opinion",
            Self::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "opinion" => Some(Self::Opinion),
            "docket" => Some(Self::Docket),
            "lead-opinion" => Some(Self::LeadOpinion),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

impl Default for DocumentType {
    fn default() -> Self {
        Self::Other
    }
}

/// A raw document fetched from the external source.
///
/// Created transiently per fetch and never mutated; the pipeline consumes it
/// and discards it after producing an `EnrichedDocument` or a failure record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateDocument {
    /// Identifier unique within the source.
    pub source_id: String,
    /// Case number as reported by the source.
    #[serde(default)]
    pub case_number: String,
    #[serde(default)]
    pub document_type: DocumentType,
    /// Court identifier (e.g. "txed").
    #[serde(default)]
    pub court: String,
    #[serde(default)]
    pub docket_number: String,
    #[serde(default)]
    pub case_name: String,
    #[serde(default)]
    pub date_filed: Option<NaiveDate>,
    /// Authoring judge string, when the source reports one.
    #[serde(default)]
    pub author: Option<String>,
    /// Document text as fetched.
    #[serde(default)]
    pub raw_content: String,
    /// Opaque source metadata; volatile fields like retrieval timestamps
    /// live here and never participate in identity.
    #[serde(default)]
    pub source_metadata: Map<String, Value>,
}

/// Outcome status of one enrichment stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    Skipped,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

/// Outcome of one enrichment stage applied to one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage_name: String,
    pub status: StageStatus,
    /// Fields produced by the stage, restricted to the keys it owns.
    #[serde(default)]
    pub produced_fields: Map<String, Value>,
    #[serde(default)]
    pub error_detail: Option<String>,
    pub duration_ms: u64,
}

impl StageResult {
    pub fn succeeded(stage_name: &str, produced_fields: Map<String, Value>, duration_ms: u64) -> Self {
        Self {
            stage_name: stage_name.to_string(),
            status: StageStatus::Succeeded,
            produced_fields,
            error_detail: None,
            duration_ms,
        }
    }

    pub fn skipped(stage_name: &str, duration_ms: u64) -> Self {
        Self {
            stage_name: stage_name.to_string(),
            status: StageStatus::Skipped,
            produced_fields: Map::new(),
            error_detail: None,
            duration_ms,
        }
    }

    pub fn failed(stage_name: &str, error: &str, duration_ms: u64) -> Self {
        Self {
            stage_name: stage_name.to_string(),
            status: StageStatus::Failed,
            produced_fields: Map::new(),
            error_detail: Some(error.to_string()),
            duration_ms,
        }
    }
}

/// A document moving through the stage sequence.
///
/// Stages read the candidate and any fields produced so far; the orchestrator
/// merges each stage's output in. Merging only adds or overwrites keys, so a
/// later stage can never delete what an earlier stage produced.
#[derive(Debug, Clone)]
pub struct WorkingDocument {
    pub candidate: CandidateDocument,
    pub fields: Map<String, Value>,
    pub stage_results: Vec<StageResult>,
}

impl WorkingDocument {
    pub fn new(candidate: CandidateDocument) -> Self {
        Self {
            candidate,
            fields: Map::new(),
            stage_results: Vec::new(),
        }
    }

    /// Look up an enriched field produced by an earlier stage.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Record a stage result, merging its produced fields in.
    pub fn record(&mut self, result: StageResult) {
        for (key, value) in &result.produced_fields {
            self.fields.insert(key.clone(), value.clone());
        }
        self.stage_results.push(result);
    }
}

/// A fully enriched document, ready for storage and indexing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedDocument {
    pub source_id: String,
    pub document_type: DocumentType,
    pub court: String,
    pub case_name: String,
    pub docket_number: String,
    pub date_filed: Option<NaiveDate>,
    pub fingerprint: String,
    /// Merged field map across all stages.
    pub fields: Map<String, Value>,
    /// Per-stage outcomes, in execution order.
    pub stage_results: Vec<StageResult>,
    /// Fraction of document-type-expected stages that succeeded.
    pub completeness: f64,
    pub enriched_at: DateTime<Utc>,
}

impl EnrichedDocument {
    /// Finalize a working document once all stages have run.
    ///
    /// `expected_stages` is the set of stage names expected for this
    /// document's type; it forms the completeness denominator.
    pub fn from_working(
        working: WorkingDocument,
        fingerprint: String,
        expected_stages: &BTreeSet<String>,
    ) -> Self {
        let completeness = completeness_score(&working.stage_results, expected_stages);
        let WorkingDocument {
            candidate,
            fields,
            stage_results,
        } = working;
        Self {
            source_id: candidate.source_id,
            document_type: candidate.document_type,
            court: candidate.court,
            case_name: candidate.case_name,
            docket_number: candidate.docket_number,
            date_filed: candidate.date_filed,
            fingerprint,
            fields,
            stage_results,
            completeness,
            enriched_at: Utc::now(),
        }
    }
}

/// Compute the completeness score over the expected-stage set.
///
/// Only stages in `expected` count toward the denominator, so a docket that
/// is never expected to yield citations is not penalized for the citation
/// stages skipping. A document type with no expected stages scores 1.0.
pub fn completeness_score(results: &[StageResult], expected: &BTreeSet<String>) -> f64 {
    if expected.is_empty() {
        return 1.0;
    }
    let succeeded = results
        .iter()
        .filter(|r| r.status == StageStatus::Succeeded && expected.contains(&r.stage_name))
        .count();
    succeeded as f64 / expected.len() as f64
}

/// The durable row keyed by fingerprint.
///
/// The dedup guarantee: exactly one `StoredRecord` per fingerprint value at
/// any time. Forced re-ingestion overwrites the payload in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub fingerprint: String,
    pub payload: EnrichedDocument,
    pub first_seen_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub update_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate() -> CandidateDocument {
        CandidateDocument {
            source_id: "op-1".to_string(),
            case_number: "2:17-cv-00141".to_string(),
            document_type: DocumentType::Opinion,
            court: "txed".to_string(),
            docket_number: "2:17-cv-00141".to_string(),
            case_name: "Acme v. Beta".to_string(),
            date_filed: NaiveDate::from_ymd_opt(2019, 6, 14),
            author: Some("Gilstrap".to_string()),
            raw_content: "opinion text".to_string(),
            source_metadata: Map::new(),
        }
    }

    #[test]
    fn test_record_merges_fields() {
        let mut working = WorkingDocument::new(candidate());

        let mut fields = Map::new();
        fields.insert("citations".to_string(), serde_json::json!(["410 U.S. 113"]));
        working.record(StageResult::succeeded("citation-extraction", fields, 5));

        assert!(working.field("citations").is_some());
        assert_eq!(working.stage_results.len(), 1);
    }

    #[test]
    fn test_record_never_deletes_earlier_fields() {
        let mut working = WorkingDocument::new(candidate());

        let mut first = Map::new();
        first.insert("court_name".to_string(), serde_json::json!("E.D. Tex."));
        working.record(StageResult::succeeded("court-resolution", first, 2));

        // A later failing stage produces nothing and must leave prior fields intact.
        working.record(StageResult::failed("citation-extraction", "boom", 1));

        assert_eq!(
            working.field("court_name"),
            Some(&serde_json::json!("E.D. Tex."))
        );
    }

    #[test]
    fn test_completeness_expected_denominator() {
        let expected: BTreeSet<String> = ["court-resolution", "keyword-extraction"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let results = vec![
            StageResult::succeeded("court-resolution", Map::new(), 1),
            // Not expected for this type; success must not inflate the score.
            StageResult::succeeded("citation-extraction", Map::new(), 1),
            StageResult::failed("keyword-extraction", "no text", 1),
        ];

        let score = completeness_score(&results, &expected);
        assert!((score - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_completeness_no_expected_stages() {
        let results = vec![StageResult::skipped("citation-extraction", 0)];
        assert_eq!(completeness_score(&results, &BTreeSet::new()), 1.0);
    }

    #[test]
    fn test_completeness_never_exceeds_one() {
        let expected: BTreeSet<String> =
            ["court-resolution"].iter().map(|s| s.to_string()).collect();
        let results = vec![
            StageResult::succeeded("court-resolution", Map::new(), 1),
            StageResult::succeeded("citation-extraction", Map::new(), 1),
            StageResult::succeeded("keyword-extraction", Map::new(), 1),
        ];
        assert!(completeness_score(&results, &expected) <= 1.0);
    }

    #[test]
    fn test_document_type_round_trip() {
        for ty in [
            DocumentType::Opinion,
            DocumentType::Docket,
            DocumentType::LeadOpinion,
            DocumentType::Other,
        ] {
            assert_eq!(DocumentType::from_str(ty.as_str()), Some(ty));
        }
        assert_eq!(DocumentType::from_str("unknown"), None);
    }
}
