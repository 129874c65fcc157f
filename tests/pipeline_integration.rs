//! End-to-end pipeline tests over a scripted source and stub providers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Map;
use tokio::sync::watch;

use lexingest::fingerprint;
use lexingest::models::{CandidateDocument, DocumentType, StageStatus};
use lexingest::pipeline::{
    BatchRunner, Orchestrator, ProcessOptions, ProcessOutcome, RunOptions,
};
use lexingest::search::NullSearchIndex;
use lexingest::source::{DocumentSource, SourceError, SourcePage, SourceQuery};
use lexingest::stages::{
    EnrichmentProvider, ProviderContext, ProviderError, ProviderSet, StageRegistry,
};
use lexingest::store::{DedupStore, InMemoryDedupStore};

fn opinion(n: usize) -> CandidateDocument {
    CandidateDocument {
        source_id: format!("op-{}", n),
        case_number: format!("2:17-cv-{:05}", n),
        document_type: DocumentType::Opinion,
        court: "txed".to_string(),
        docket_number: format!("2:17-cv-{:05}", n),
        case_name: format!("Plaintiff {} v. Defendant", n),
        date_filed: chrono::NaiveDate::from_ymd_opt(2019, 6, 14),
        author: Some("Gilstrap".to_string()),
        raw_content: format!("The court cites 410 U.S. 113 in case {}.", n),
        source_metadata: Map::new(),
    }
}

/// Provider producing a fixed set of fields under one key.
struct FixedProvider {
    key: &'static str,
    value: serde_json::Value,
}

#[async_trait]
impl EnrichmentProvider for FixedProvider {
    fn name(&self) -> &str {
        self.key
    }

    async fn enrich(
        &self,
        _text: &str,
        _context: &ProviderContext<'_>,
    ) -> Result<Map<String, serde_json::Value>, ProviderError> {
        let mut fields = Map::new();
        fields.insert(self.key.to_string(), self.value.clone());
        Ok(fields)
    }
}

/// Provider that always fails.
struct BrokenProvider;

#[async_trait]
impl EnrichmentProvider for BrokenProvider {
    fn name(&self) -> &str {
        "broken"
    }

    async fn enrich(
        &self,
        _text: &str,
        _context: &ProviderContext<'_>,
    ) -> Result<Map<String, serde_json::Value>, ProviderError> {
        Err(ProviderError::Failed("synthetic provider outage".to_string()))
    }
}

fn providers_with_citations() -> ProviderSet {
    ProviderSet {
        citation_extraction: Arc::new(FixedProvider {
            key: "citations",
            value: serde_json::json!(["410 U.S. 113"]),
        }),
        keyword_extraction: Arc::new(FixedProvider {
            key: "keywords",
            value: serde_json::json!(["patent"]),
        }),
        ..ProviderSet::default()
    }
}

fn orchestrator_with(
    providers: ProviderSet,
    store: Arc<dyn DedupStore>,
) -> Arc<Orchestrator> {
    Arc::new(Orchestrator::new(
        StageRegistry::standard(providers),
        store,
        Arc::new(NullSearchIndex),
        Duration::from_secs(5),
    ))
}

struct ScriptedSource {
    pages: Vec<SourcePage>,
}

#[async_trait]
impl DocumentSource for ScriptedSource {
    async fn fetch_page(
        &self,
        _query: &SourceQuery,
        cursor: Option<&str>,
        _page_size: usize,
    ) -> Result<SourcePage, SourceError> {
        let index = cursor
            .map(|c| c.parse::<usize>().unwrap_or(usize::MAX))
            .unwrap_or(0);
        self.pages
            .get(index)
            .cloned()
            .ok_or_else(|| SourceError::Exhausted {
                attempts: 1,
                last_error: "no such page".to_string(),
            })
    }
}

fn paged(documents: Vec<CandidateDocument>, per_page: usize) -> ScriptedSource {
    let mut pages: Vec<SourcePage> = documents
        .chunks(per_page)
        .enumerate()
        .map(|(i, chunk)| SourcePage {
            results: chunk.to_vec(),
            next_cursor: Some((i + 1).to_string()),
        })
        .collect();
    if let Some(last) = pages.last_mut() {
        last.next_cursor = None;
    } else {
        pages.push(SourcePage::default());
    }
    ScriptedSource { pages }
}

fn no_cancel() -> watch::Receiver<bool> {
    watch::channel(false).1
}

#[tokio::test]
async fn identical_identity_produces_one_stored_record() {
    // Two candidates with identical identity fields but different volatile
    // metadata must dedup to exactly one stored row.
    let mut first = opinion(141);
    first
        .source_metadata
        .insert("retrievedAt".to_string(), serde_json::json!("2026-08-01T10:00:00Z"));
    let mut second = opinion(141);
    second.source_id = "op-recrawl".to_string();
    second
        .source_metadata
        .insert("retrievedAt".to_string(), serde_json::json!("2026-08-07T16:30:00Z"));

    let store: Arc<dyn DedupStore> = Arc::new(InMemoryDedupStore::new());
    let orchestrator = orchestrator_with(providers_with_citations(), store.clone());
    let runner = BatchRunner::new(Arc::new(paged(vec![first, second], 10)), orchestrator);

    let report = runner
        .run(SourceQuery::default(), RunOptions::default(), no_cancel(), None)
        .await
        .unwrap();

    assert_eq!(report.new_documents, 1);
    assert_eq!(report.duplicates, 1);
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn failing_stage_leaves_other_stage_output_intact() {
    // citation-validation is broken; fields from stages before (citation
    // extraction) and after (keyword extraction) must still be present.
    let providers = ProviderSet {
        citation_validation: Arc::new(BrokenProvider),
        ..providers_with_citations()
    };
    let store: Arc<dyn DedupStore> = Arc::new(InMemoryDedupStore::new());
    let orchestrator = orchestrator_with(providers, store.clone());

    let outcome = orchestrator
        .process(opinion(7), ProcessOptions::default())
        .await
        .unwrap();

    let ProcessOutcome::Stored { document, .. } = outcome else {
        panic!("expected stored outcome");
    };

    let failed = document
        .stage_results
        .iter()
        .find(|r| r.stage_name == "citation-validation")
        .unwrap();
    assert_eq!(failed.status, StageStatus::Failed);
    assert!(failed.error_detail.as_deref().unwrap().contains("outage"));

    assert!(document.fields.get("citations").is_some());
    assert!(document.fields.get("keywords").is_some());
    // Aggregation downstream of the failure also ran.
    assert!(document.fields.get("search_terms").is_some());
}

#[tokio::test]
async fn docket_completeness_excludes_citation_stages() {
    // For a docket, citation stages are not expected; a docket with no
    // citations succeeding still scores over its own expected set only.
    let store: Arc<dyn DedupStore> = Arc::new(InMemoryDedupStore::new());
    let orchestrator = orchestrator_with(providers_with_citations(), store);

    let mut docket = opinion(9);
    docket.document_type = DocumentType::Docket;
    docket.raw_content = "Docket entry list.".to_string();

    let outcome = orchestrator
        .process(docket, ProcessOptions::default())
        .await
        .unwrap();
    let ProcessOutcome::Stored { document, .. } = outcome else {
        panic!("expected stored outcome");
    };

    // Expected for dockets: court-resolution, judge-enhancement,
    // keyword-extraction, metadata-carry. All providers here succeed, so
    // the score is exactly 1.0 despite citation stages skipping.
    let citation = document
        .stage_results
        .iter()
        .find(|r| r.stage_name == "citation-validation")
        .unwrap();
    assert_eq!(citation.status, StageStatus::Skipped);
    assert!((document.completeness - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn batch_with_one_unidentifiable_document_does_not_abort() {
    let mut docs: Vec<_> = (0..10).map(opinion).collect();
    docs[5] = CandidateDocument {
        source_id: "op-anon".to_string(),
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

    let store: Arc<dyn DedupStore> = Arc::new(InMemoryDedupStore::new());
    let orchestrator = orchestrator_with(providers_with_citations(), store.clone());
    let runner = BatchRunner::new(Arc::new(paged(docs, 3)), orchestrator);

    let report = runner
        .run(SourceQuery::default(), RunOptions::default(), no_cancel(), None)
        .await
        .unwrap();

    assert_eq!(report.new_documents, 9);
    assert_eq!(report.failed_documents, 1);
    assert_eq!(report.error_counts["fingerprint"], 1);
    assert_eq!(store.count().await.unwrap(), 9);
}

#[tokio::test]
async fn force_rerun_updates_instead_of_duplicating() {
    let store: Arc<dyn DedupStore> = Arc::new(InMemoryDedupStore::new());
    let orchestrator = orchestrator_with(providers_with_citations(), store.clone());

    let first = BatchRunner::new(
        Arc::new(paged(vec![opinion(1), opinion(2)], 10)),
        orchestrator.clone(),
    );
    let report = first
        .run(SourceQuery::default(), RunOptions::default(), no_cancel(), None)
        .await
        .unwrap();
    assert_eq!(report.new_documents, 2);

    let second = BatchRunner::new(
        Arc::new(paged(vec![opinion(1), opinion(2)], 10)),
        orchestrator,
    );
    let report = second
        .run(
            SourceQuery::default(),
            RunOptions {
                force: true,
                ..Default::default()
            },
            no_cancel(),
            None,
        )
        .await
        .unwrap();

    assert_eq!(report.new_documents, 0);
    assert_eq!(report.updated_documents, 2);
    assert_eq!(store.count().await.unwrap(), 2);

    let fp = fingerprint::compute(&opinion(1)).unwrap();
    let record = store.get(&fp).await.unwrap().unwrap();
    assert_eq!(record.update_count, 1);
}

#[tokio::test]
async fn strict_batch_fails_low_quality_documents() {
    let providers = ProviderSet {
        // court-resolution is expected for every type; breaking it makes
        // every document fail under strict.
        court_resolution: Arc::new(BrokenProvider),
        ..providers_with_citations()
    };
    let store: Arc<dyn DedupStore> = Arc::new(InMemoryDedupStore::new());
    let orchestrator = orchestrator_with(providers, store.clone());
    let runner = BatchRunner::new(Arc::new(paged(vec![opinion(1)], 10)), orchestrator);

    let report = runner
        .run(
            SourceQuery::default(),
            RunOptions {
                strict: true,
                ..Default::default()
            },
            no_cancel(),
            None,
        )
        .await
        .unwrap();

    assert_eq!(report.new_documents, 0);
    assert_eq!(report.failed_documents, 1);
    assert_eq!(report.error_counts["strict_quality"], 1);
    assert_eq!(store.count().await.unwrap(), 0);
}
