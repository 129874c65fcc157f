//! Batch runner: drives paged fetches through a bounded worker pool.
//!
//! A feeder task pulls cursor pages from the source and queues candidate
//! documents; `concurrency` workers call the orchestrator per document and
//! report outcomes over a channel. Aggregation happens in one place with
//! plain counters, so completion order never matters. No single failing
//! document aborts the batch; a failed page fetch does, since nothing more
//! can be retrieved.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};

use crate::models::CandidateDocument;
use crate::source::{DocumentSource, SourceError, SourceQuery};

use super::orchestrator::{Orchestrator, ProcessOptions, ProcessOutcome};
use super::report::{BatchRunReport, ErrorKind, ReportedError};

/// Options for one batch run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub concurrency: usize,
    /// Stop dispatching after this many candidates (None = source exhausted).
    pub max_documents: Option<usize>,
    pub page_size: usize,
    pub force: bool,
    pub strict: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_documents: None,
            page_size: 50,
            force: false,
            strict: false,
        }
    }
}

/// Progress events emitted during a batch run.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    PageFetched {
        page: u64,
        candidates: usize,
    },
    DocumentStored {
        source_id: String,
        is_new: bool,
    },
    DocumentSkipped {
        source_id: String,
    },
    DocumentFailed {
        source_id: String,
        error: String,
    },
    SourceExhausted,
    Cancelled,
}

#[derive(Debug, Error)]
pub enum BatchError {
    /// The very first page fetch failed: nothing was retrievable, so there
    /// is no partial report to return.
    #[error("source unreachable: {0}")]
    SourceUnreachable(#[from] SourceError),
}

/// Internal message from feeder/workers to the aggregator.
enum Outcome {
    Page {
        candidates: usize,
    },
    Processed {
        outcome: ProcessOutcome,
        forced: bool,
    },
    DocumentError {
        source_id: String,
        kind: ErrorKind,
        detail: String,
    },
    PageError {
        cursor: Option<String>,
        detail: String,
    },
}

/// Drives one bounded-concurrency batch over the document source.
pub struct BatchRunner {
    source: Arc<dyn DocumentSource>,
    orchestrator: Arc<Orchestrator>,
}

impl BatchRunner {
    pub fn new(source: Arc<dyn DocumentSource>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            source,
            orchestrator,
        }
    }

    /// Run a batch to completion (or cancellation) and return its report.
    ///
    /// Returns an error only when the source is unreachable from the very
    /// first page; any later failure is folded into the report.
    pub async fn run(
        &self,
        query: SourceQuery,
        opts: RunOptions,
        cancel: watch::Receiver<bool>,
        event_tx: Option<mpsc::Sender<BatchEvent>>,
    ) -> Result<BatchRunReport, BatchError> {
        let concurrency = opts.concurrency.max(1);

        // Probe the first page up front so an unreachable source is a
        // top-level error rather than an empty report.
        let first_page = self
            .source
            .fetch_page(&query, None, opts.page_size)
            .await?;

        let (doc_tx, doc_rx) = mpsc::channel::<CandidateDocument>(concurrency * 2);
        let doc_rx = Arc::new(Mutex::new(doc_rx));
        let (outcome_tx, mut outcome_rx) = mpsc::channel::<Outcome>(concurrency * 2);

        // Feeder: queue the first page, then follow cursors.
        let feeder = tokio::spawn(feed_pages(
            self.source.clone(),
            query,
            opts.clone(),
            first_page,
            doc_tx,
            outcome_tx.clone(),
            cancel.clone(),
            event_tx.clone(),
        ));

        // Bounded worker pool.
        let process_opts = ProcessOptions {
            force: opts.force,
            strict: opts.strict,
        };
        let mut workers = Vec::with_capacity(concurrency);
        for _ in 0..concurrency {
            let orchestrator = self.orchestrator.clone();
            let doc_rx = doc_rx.clone();
            let outcome_tx = outcome_tx.clone();
            let cancel = cancel.clone();
            let event_tx = event_tx.clone();

            workers.push(tokio::spawn(async move {
                loop {
                    if *cancel.borrow() {
                        break;
                    }

                    let candidate = {
                        let mut rx = doc_rx.lock().await;
                        rx.recv().await
                    };
                    let Some(candidate) = candidate else {
                        break;
                    };
                    let source_id = candidate.source_id.clone();

                    match orchestrator
                        .process_cancellable(candidate, process_opts, Some(&cancel))
                        .await
                    {
                        Ok(ProcessOutcome::Interrupted) => break,
                        Ok(outcome) => {
                            if let Some(tx) = &event_tx {
                                let event = match &outcome {
                                    ProcessOutcome::Stored { is_new, .. } => {
                                        BatchEvent::DocumentStored {
                                            source_id: source_id.clone(),
                                            is_new: *is_new,
                                        }
                                    }
                                    ProcessOutcome::SkippedDuplicate { .. } => {
                                        BatchEvent::DocumentSkipped {
                                            source_id: source_id.clone(),
                                        }
                                    }
                                    ProcessOutcome::Interrupted => unreachable!(),
                                };
                                let _ = tx.send(event).await;
                            }
                            let _ = outcome_tx
                                .send(Outcome::Processed {
                                    outcome,
                                    forced: process_opts.force,
                                })
                                .await;
                        }
                        Err(e) => {
                            tracing::warn!("document {} failed: {}", source_id, e);
                            if let Some(tx) = &event_tx {
                                let _ = tx
                                    .send(BatchEvent::DocumentFailed {
                                        source_id: source_id.clone(),
                                        error: e.to_string(),
                                    })
                                    .await;
                            }
                            let _ = outcome_tx
                                .send(Outcome::DocumentError {
                                    source_id,
                                    kind: e.kind(),
                                    detail: e.to_string(),
                                })
                                .await;
                        }
                    }
                }
            }));
        }

        // The aggregator owns the only remaining sender clone; drop it so
        // the channel closes once feeder and workers are done.
        drop(outcome_tx);

        let mut report = BatchRunReport::new();
        while let Some(outcome) = outcome_rx.recv().await {
            match outcome {
                Outcome::Page { candidates } => report.record_page(candidates),
                Outcome::Processed { outcome, forced } => match outcome {
                    ProcessOutcome::Stored { document, is_new } => {
                        report.record_stored(&document, is_new, forced)
                    }
                    ProcessOutcome::SkippedDuplicate { .. } => report.record_duplicate(),
                    // Abandoned mid-enrichment on cancellation; counted
                    // nowhere, the report's cancelled flag tells the story.
                    ProcessOutcome::Interrupted => {}
                },
                Outcome::DocumentError {
                    source_id,
                    kind,
                    detail,
                } => report.record_error(ReportedError {
                    kind,
                    document_id: Some(source_id),
                    cursor: None,
                    detail,
                }),
                Outcome::PageError { cursor, detail } => report.record_error(ReportedError {
                    kind: ErrorKind::SourceFetch,
                    document_id: None,
                    cursor,
                    detail,
                }),
            }
        }

        let _ = feeder.await;
        for worker in workers {
            let _ = worker.await;
        }

        report.cancelled = *cancel.borrow();
        if report.cancelled {
            if let Some(tx) = &event_tx {
                let _ = tx.send(BatchEvent::Cancelled).await;
            }
        }
        report.finalize();
        Ok(report)
    }
}

/// Feeder task: dispatch the first page, then follow cursors until the
/// source is exhausted, the document cap is reached, or the run is
/// cancelled. A page fetch failure stops the feed; already-queued documents
/// still drain through the workers.
#[allow(clippy::too_many_arguments)]
async fn feed_pages(
    source: Arc<dyn DocumentSource>,
    query: SourceQuery,
    opts: RunOptions,
    first_page: crate::source::SourcePage,
    doc_tx: mpsc::Sender<CandidateDocument>,
    outcome_tx: mpsc::Sender<Outcome>,
    cancel: watch::Receiver<bool>,
    event_tx: Option<mpsc::Sender<BatchEvent>>,
) {
    let mut dispatched = 0usize;
    let mut page_number = 0u64;
    let mut page = first_page;

    loop {
        page_number += 1;

        let mut candidates = page.results.len();
        if let Some(max) = opts.max_documents {
            let left = max.saturating_sub(dispatched);
            candidates = candidates.min(left);
        }

        let _ = outcome_tx.send(Outcome::Page { candidates }).await;
        if let Some(tx) = &event_tx {
            let _ = tx
                .send(BatchEvent::PageFetched {
                    page: page_number,
                    candidates,
                })
                .await;
        }

        let is_last = page.is_last();
        let next_cursor = page.next_cursor.take();

        for candidate in page.results.drain(..).take(candidates) {
            if *cancel.borrow() {
                return;
            }
            if doc_tx.send(candidate).await.is_err() {
                return;
            }
            dispatched += 1;
        }

        let capped = opts
            .max_documents
            .is_some_and(|max| dispatched >= max);
        if is_last || capped || *cancel.borrow() {
            if is_last {
                if let Some(tx) = &event_tx {
                    let _ = tx.send(BatchEvent::SourceExhausted).await;
                }
            }
            return;
        }

        match source
            .fetch_page(&query, next_cursor.as_deref(), opts.page_size)
            .await
        {
            Ok(next) => page = next,
            Err(e) => {
                tracing::error!("page fetch failed, aborting batch: {}", e);
                let _ = outcome_tx
                    .send(Outcome::PageError {
                        cursor: next_cursor,
                        detail: e.to_string(),
                    })
                    .await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Map;

    use crate::models::DocumentType;
    use crate::search::NullSearchIndex;
    use crate::source::SourcePage;
    use crate::stages::{ProviderSet, StageRegistry};
    use crate::store::InMemoryDedupStore;

    fn candidate(n: usize) -> CandidateDocument {
        CandidateDocument {
            source_id: format!("op-{}", n),
            case_number: format!("1:20-cv-{:05}", n),
            document_type: DocumentType::Opinion,
            court: "txed".to_string(),
            docket_number: format!("1:20-cv-{:05}", n),
            case_name: format!("Case {}", n),
            date_filed: None,
            author: None,
            raw_content: format!("opinion body {}", n),
            source_metadata: Map::new(),
        }
    }

    /// Source serving a fixed set of documents across fixed-size pages.
    struct ScriptedSource {
        pages: Vec<SourcePage>,
        fetches: AtomicUsize,
    }

    impl ScriptedSource {
        fn paged(documents: Vec<CandidateDocument>, per_page: usize) -> Self {
            let total = documents.len();
            let mut pages: Vec<SourcePage> = documents
                .chunks(per_page.max(1))
                .enumerate()
                .map(|(i, chunk)| SourcePage {
                    results: chunk.to_vec(),
                    next_cursor: Some(format!("cursor-{}", i + 1)),
                })
                .collect();
            if let Some(last) = pages.last_mut() {
                last.next_cursor = None;
            }
            if total == 0 {
                pages.push(SourcePage::default());
            }
            Self {
                pages,
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DocumentSource for ScriptedSource {
        async fn fetch_page(
            &self,
            _query: &SourceQuery,
            cursor: Option<&str>,
            _page_size: usize,
        ) -> Result<SourcePage, SourceError> {
            self.fetches.fetch_add(1, Ordering::Relaxed);
            let index = match cursor {
                None => 0,
                Some(c) => c
                    .strip_prefix("cursor-")
                    .and_then(|n| n.parse::<usize>().ok())
                    .unwrap_or(usize::MAX),
            };
            self.pages
                .get(index)
                .cloned()
                .ok_or_else(|| SourceError::Exhausted {
                    attempts: 1,
                    last_error: "page out of range".to_string(),
                })
        }
    }

    /// Source whose every fetch fails.
    struct DeadSource;

    #[async_trait]
    impl DocumentSource for DeadSource {
        async fn fetch_page(
            &self,
            _query: &SourceQuery,
            _cursor: Option<&str>,
            _page_size: usize,
        ) -> Result<SourcePage, SourceError> {
            Err(SourceError::Exhausted {
                attempts: 3,
                last_error: "connection refused".to_string(),
            })
        }
    }

    fn runner(source: Arc<dyn DocumentSource>) -> BatchRunner {
        let orchestrator = Orchestrator::new(
            StageRegistry::standard(ProviderSet::default()),
            Arc::new(InMemoryDedupStore::new()),
            Arc::new(NullSearchIndex),
            Duration::from_secs(5),
        );
        BatchRunner::new(source, Arc::new(orchestrator))
    }

    fn no_cancel() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test]
    async fn test_batch_processes_all_pages() {
        let docs: Vec<_> = (0..10).map(candidate).collect();
        let source = Arc::new(ScriptedSource::paged(docs, 3));
        let runner = runner(source);

        let report = runner
            .run(
                SourceQuery::default(),
                RunOptions {
                    concurrency: 3,
                    ..Default::default()
                },
                no_cancel(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(report.total_candidates, 10);
        assert_eq!(report.new_documents, 10);
        assert_eq!(report.pages_fetched, 4);
        assert_eq!(report.failed_documents, 0);
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_one_bad_document_does_not_abort_batch() {
        let mut docs: Vec<_> = (0..10).map(candidate).collect();
        // Document #5 has no identity at all -> FingerprintError.
        docs[5] = CandidateDocument {
            source_id: "op-bad".to_string(),
            case_number: String::new(),
            document_type: DocumentType::Other,
            court: String::new(),
            docket_number: String::new(),
            case_name: String::new(),
            date_filed: None,
            author: None,
            raw_content: String::new(),
            source_metadata: Map::new(),
        };
        let source = Arc::new(ScriptedSource::paged(docs, 4));
        let runner = runner(source);

        let report = runner
            .run(SourceQuery::default(), RunOptions::default(), no_cancel(), None)
            .await
            .unwrap();

        assert_eq!(report.new_documents, 9);
        assert_eq!(report.failed_documents, 1);
        assert_eq!(report.error_counts["fingerprint"], 1);
        assert_eq!(report.errors[0].document_id.as_deref(), Some("op-bad"));
    }

    #[tokio::test]
    async fn test_duplicates_are_counted_not_errored() {
        let mut docs: Vec<_> = (0..4).map(candidate).collect();
        // Two copies of the same logical document, differing only in
        // volatile metadata.
        let mut copy = docs[0].clone();
        copy.source_id = "op-copy".to_string();
        copy.source_metadata
            .insert("retrievedAt".to_string(), serde_json::json!("later"));
        docs.push(copy);
        let source = Arc::new(ScriptedSource::paged(docs, 10));
        let runner = runner(source);

        let report = runner
            .run(
                SourceQuery::default(),
                RunOptions {
                    concurrency: 1,
                    ..Default::default()
                },
                no_cancel(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(report.new_documents, 4);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.failed_documents, 0);
    }

    #[tokio::test]
    async fn test_max_documents_caps_dispatch() {
        let docs: Vec<_> = (0..20).map(candidate).collect();
        let source = Arc::new(ScriptedSource::paged(docs, 5));
        let runner = runner(source);

        let report = runner
            .run(
                SourceQuery::default(),
                RunOptions {
                    max_documents: Some(7),
                    ..Default::default()
                },
                no_cancel(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(report.new_documents, 7);
        assert_eq!(report.total_candidates, 7);
    }

    #[tokio::test]
    async fn test_unreachable_source_is_top_level_error() {
        let runner = runner(Arc::new(DeadSource));
        let result = runner
            .run(SourceQuery::default(), RunOptions::default(), no_cancel(), None)
            .await;
        assert!(matches!(result, Err(BatchError::SourceUnreachable(_))));
    }

    #[tokio::test]
    async fn test_mid_batch_page_failure_keeps_partial_results() {
        // Two good pages, then the source dies.
        let docs: Vec<_> = (0..6).map(candidate).collect();
        let mut source = ScriptedSource::paged(docs, 3);
        source.pages.truncate(1);
        // Leave a dangling cursor so the second fetch fails.
        source.pages[0].next_cursor = Some("cursor-99".to_string());
        let runner = runner(Arc::new(source));

        let report = runner
            .run(SourceQuery::default(), RunOptions::default(), no_cancel(), None)
            .await
            .unwrap();

        assert_eq!(report.new_documents, 3);
        assert_eq!(report.error_counts["source_fetch"], 1);
        assert!(report.errors.iter().any(|e| e.cursor.is_some()));
    }

    #[tokio::test]
    async fn test_cancellation_produces_partial_annotated_report() {
        let docs: Vec<_> = (0..50).map(candidate).collect();
        let source = Arc::new(ScriptedSource::paged(docs, 5));
        let runner = runner(source);

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let _ = cancel_tx.send(true);

        let report = runner
            .run(SourceQuery::default(), RunOptions::default(), cancel_rx, None)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert!(report.new_documents < 50);
    }
}
