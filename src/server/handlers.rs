//! Trigger API endpoint handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use tokio::sync::watch;
use uuid::Uuid;

use crate::pipeline::RunOptions;
use crate::source::SourceQuery;
use crate::store::DedupStore;

use super::{AppState, JobStatus};

/// Health check endpoint for container orchestration.
pub async fn health() -> impl IntoResponse {
    StatusCode::OK
}

/// Body of the batch trigger request.
#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub court: Option<String>,
    pub filed_after: Option<NaiveDate>,
    pub filed_before: Option<NaiveDate>,
    pub max_documents: Option<usize>,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub strict: bool,
    pub concurrency: Option<usize>,
}

/// Store totals for a quick operational overview.
pub async fn api_status(State(state): State<AppState>) -> impl IntoResponse {
    let stored = state.orchestrator.store().count().await.unwrap_or(0);
    let jobs = state.jobs.read().await;
    let running = jobs
        .values()
        .filter(|status| matches!(status, JobStatus::Running))
        .count();

    Json(serde_json::json!({
        "stored_documents": stored,
        "running_jobs": running,
        "total_jobs": jobs.len(),
    }))
}

/// Start a batch run and return a job id for polling.
pub async fn start_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> impl IntoResponse {
    let job_id = Uuid::new_v4();
    {
        let mut jobs = state.jobs.write().await;
        jobs.insert(job_id, JobStatus::Running);
    }

    let query = SourceQuery {
        court: request.court,
        filed_after: request.filed_after,
        filed_before: request.filed_before,
    };
    let opts = RunOptions {
        concurrency: request.concurrency.unwrap_or(state.default_concurrency),
        max_documents: request.max_documents,
        page_size: state.default_page_size,
        force: request.force,
        strict: request.strict,
    };

    let runner = state.runner();
    let jobs = state.jobs.clone();
    tokio::spawn(async move {
        // The job registry holds no cancel handle yet; runs are bounded by
        // max_documents or source exhaustion.
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let status = match runner.run(query, opts, cancel_rx, None).await {
            Ok(report) => JobStatus::Completed(report),
            Err(e) => JobStatus::Failed(e.to_string()),
        };
        let mut jobs = jobs.write().await;
        jobs.insert(job_id, status);
    });

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "job_id": job_id })),
    )
}

/// Poll a batch job.
pub async fn batch_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> impl IntoResponse {
    let jobs = state.jobs.read().await;
    match jobs.get(&job_id) {
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "unknown job" })),
        ),
        Some(JobStatus::Running) => (
            StatusCode::OK,
            Json(serde_json::json!({ "state": "running" })),
        ),
        Some(JobStatus::Failed(error)) => (
            StatusCode::OK,
            Json(serde_json::json!({ "state": "failed", "error": error })),
        ),
        Some(JobStatus::Completed(report)) => (
            StatusCode::OK,
            Json(serde_json::json!({ "state": "completed", "report": report })),
        ),
    }
}
