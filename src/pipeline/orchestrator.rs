//! Per-document pipeline orchestration.
//!
//! State machine per document:
//! Fetched -> Fingerprinted -> DedupChecked ->
//!   (SkippedDuplicate | Enriching -> Enriched) -> Stored
//!
//! Stage failures are recorded in the stage results and never abort the
//! document; fingerprint and storage errors are always fatal for it.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::fingerprint::{self, FingerprintError};
use crate::models::{CandidateDocument, EnrichedDocument, StageResult, WorkingDocument};
use crate::search::SearchIndex;
use crate::stages::{StageError, StageOutput, StageRegistry};
use crate::store::{DedupStore, StoreError};

use super::report::ErrorKind;

/// Per-document processing options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessOptions {
    /// Re-enrich and overwrite documents that are already stored.
    pub force: bool,
    /// Fail the document when an expected stage fails, instead of storing
    /// it with a reduced completeness score.
    pub strict: bool,
}

/// Terminal outcome of processing one document.
#[derive(Debug)]
pub enum ProcessOutcome {
    Stored {
        document: EnrichedDocument,
        is_new: bool,
    },
    SkippedDuplicate {
        fingerprint: String,
    },
    /// Cancellation was observed between stages; the document was abandoned
    /// without being stored.
    Interrupted,
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("fingerprint: {0}")]
    Fingerprint(#[from] FingerprintError),
    #[error("storage: {0}")]
    Storage(#[from] StoreError),
    #[error("expected stage '{stage}' failed in strict mode: {detail}")]
    StrictStageFailure { stage: String, detail: String },
}

impl ProcessError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Fingerprint(_) => ErrorKind::Fingerprint,
            Self::Storage(_) => ErrorKind::Storage,
            Self::StrictStageFailure { .. } => ErrorKind::StrictQuality,
        }
    }
}

/// Sequences enrichment stages and writes through the dedup store.
pub struct Orchestrator {
    registry: StageRegistry,
    store: Arc<dyn DedupStore>,
    search: Arc<dyn SearchIndex>,
    stage_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        registry: StageRegistry,
        store: Arc<dyn DedupStore>,
        search: Arc<dyn SearchIndex>,
        stage_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            search,
            stage_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn DedupStore> {
        &self.store
    }

    /// Process one candidate document end to end.
    pub async fn process(
        &self,
        candidate: CandidateDocument,
        opts: ProcessOptions,
    ) -> Result<ProcessOutcome, ProcessError> {
        self.process_cancellable(candidate, opts, None).await
    }

    /// Process one document, checking the cancellation signal between
    /// stages. An in-flight stage finishes; no new stage begins afterwards.
    pub async fn process_cancellable(
        &self,
        candidate: CandidateDocument,
        opts: ProcessOptions,
        cancel: Option<&watch::Receiver<bool>>,
    ) -> Result<ProcessOutcome, ProcessError> {
        let fp = fingerprint::compute(&candidate)?;

        // Fast path: an existing record short-circuits enrichment entirely.
        // The upsert below still guards the concurrent case atomically.
        if !opts.force && self.store.get(&fp).await?.is_some() {
            tracing::debug!("duplicate fingerprint {}, skipping {}", fp, candidate.source_id);
            return Ok(ProcessOutcome::SkippedDuplicate { fingerprint: fp });
        }

        let document_type = candidate.document_type;
        let mut working = WorkingDocument::new(candidate);

        for stage in self.registry.iter() {
            if cancel.is_some_and(|c| *c.borrow()) {
                return Ok(ProcessOutcome::Interrupted);
            }

            let result = self.run_stage(stage.as_ref(), &working).await;

            if opts.strict
                && result.status == crate::models::StageStatus::Failed
                && stage.is_expected(document_type)
            {
                return Err(ProcessError::StrictStageFailure {
                    stage: stage.name().to_string(),
                    detail: result
                        .error_detail
                        .unwrap_or_else(|| "unknown stage error".to_string()),
                });
            }

            working.record(result);
        }

        let expected = self.registry.expected_for(document_type);
        let enriched = EnrichedDocument::from_working(working, fp.clone(), &expected);

        let is_new = self.store.upsert(&fp, &enriched, opts.force).await?;

        // Fire-and-forget index push; a failure never affects the outcome.
        let search = self.search.clone();
        let for_index = enriched.clone();
        tokio::spawn(async move {
            if let Err(e) = search.push(&for_index).await {
                tracing::warn!("search index push failed for {}: {}", for_index.source_id, e);
            }
        });

        Ok(ProcessOutcome::Stored {
            document: enriched,
            is_new,
        })
    }

    /// Run one stage with the configured timeout and wrap its outcome.
    async fn run_stage(
        &self,
        stage: &dyn crate::stages::Stage,
        working: &WorkingDocument,
    ) -> StageResult {
        let start = Instant::now();
        let outcome = match tokio::time::timeout(self.stage_timeout, stage.apply(working)).await {
            Ok(result) => result,
            Err(_) => Err(StageError::Timeout(self.stage_timeout)),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(StageOutput::Fields(mut fields)) => {
                // Restrict output to the keys the stage owns.
                let owned = stage.owned_fields();
                fields.retain(|key, _| owned.contains(&key.as_str()));
                StageResult::succeeded(stage.name(), fields, duration_ms)
            }
            Ok(StageOutput::Skipped) => StageResult::skipped(stage.name(), duration_ms),
            Err(e) => {
                tracing::warn!("stage {} failed: {}", stage.name(), e);
                StageResult::failed(stage.name(), &e.to_string(), duration_ms)
            }
        }
    }
}
