//! Batch run report: aggregate statistics for one batch runner invocation.
//!
//! All aggregation is simple commutative counters, so concurrent completion
//! order never affects the final report.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::{EnrichedDocument, StageStatus};

/// Error taxonomy used for report counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unidentifiable document; cannot be deduplicated.
    Fingerprint,
    /// Page fetch failed after retries; aborts the batch.
    SourceFetch,
    /// Storage write failed for one document.
    Storage,
    /// Expected stage failed while running in strict mode.
    StrictQuality,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fingerprint => "fingerprint",
            Self::SourceFetch => "source_fetch",
            Self::Storage => "storage",
            Self::StrictQuality => "strict_quality",
        }
    }
}

/// Per-stage success/failure/skip counts across the batch.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StageStats {
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
}

/// One recorded fatal error, with enough identifiers to chase it down.
#[derive(Debug, Clone, Serialize)]
pub struct ReportedError {
    pub kind: ErrorKind,
    /// Source document id, when the error is per-document.
    pub document_id: Option<String>,
    /// Pagination cursor, when the error is per-page.
    pub cursor: Option<String>,
    pub detail: String,
}

/// Aggregate of one batch runner invocation.
#[derive(Debug, Default, Serialize)]
pub struct BatchRunReport {
    /// Candidates seen from the source.
    pub total_candidates: u64,
    pub pages_fetched: u64,
    /// Documents stored for the first time.
    pub new_documents: u64,
    /// Existing documents overwritten under force.
    pub updated_documents: u64,
    /// Documents skipped because an identical fingerprint was stored.
    pub duplicates: u64,
    /// Documents that hit a fatal per-document error.
    pub failed_documents: u64,
    pub stage_stats: BTreeMap<String, StageStats>,
    /// Counts keyed by `ErrorKind::as_str`.
    pub error_counts: BTreeMap<String, u64>,
    pub errors: Vec<ReportedError>,
    pub average_completeness: f64,
    /// Set when the run was cut short by a cancellation signal.
    pub cancelled: bool,

    #[serde(skip)]
    completeness_sum: f64,
    #[serde(skip)]
    scored_documents: u64,
}

impl BatchRunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_page(&mut self, candidates: usize) {
        self.pages_fetched += 1;
        self.total_candidates += candidates as u64;
    }

    /// Record a document that went through enrichment and storage.
    pub fn record_stored(&mut self, document: &EnrichedDocument, is_new: bool, forced: bool) {
        if is_new {
            self.new_documents += 1;
        } else if forced {
            self.updated_documents += 1;
        } else {
            // Lost the storage race to a concurrent worker; the stored row
            // exists, which is all the dedup guarantee promises.
            self.duplicates += 1;
        }

        self.completeness_sum += document.completeness;
        self.scored_documents += 1;

        for result in &document.stage_results {
            let stats = self
                .stage_stats
                .entry(result.stage_name.clone())
                .or_default();
            match result.status {
                StageStatus::Succeeded => stats.succeeded += 1,
                StageStatus::Failed => stats.failed += 1,
                StageStatus::Skipped => stats.skipped += 1,
            }
        }
    }

    /// Record a document skipped before enrichment as a duplicate.
    pub fn record_duplicate(&mut self) {
        self.duplicates += 1;
    }

    /// Record a fatal per-document or per-page error.
    pub fn record_error(&mut self, error: ReportedError) {
        self.failed_documents += u64::from(error.document_id.is_some());
        *self
            .error_counts
            .entry(error.kind.as_str().to_string())
            .or_default() += 1;
        self.errors.push(error);
    }

    /// Finalize derived values. Call once, after all outcomes are recorded.
    pub fn finalize(&mut self) {
        self.average_completeness = if self.scored_documents > 0 {
            self.completeness_sum / self.scored_documents as f64
        } else {
            0.0
        };
    }
}
