//! Minimal HTTP trigger surface for batch runs.
//!
//! `POST /api/batches` starts a run and returns a job id; the report is
//! polled via `GET /api/batches/:job_id`. This is deliberately a thin
//! wrapper over the batch runner, not a dashboard.

mod handlers;
mod routes;

pub use routes::create_router;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::pipeline::{BatchRunReport, BatchRunner, Orchestrator};
use crate::source::DocumentSource;

/// Lifecycle of one triggered batch job.
#[derive(Debug)]
pub enum JobStatus {
    Running,
    Completed(BatchRunReport),
    Failed(String),
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub source: Arc<dyn DocumentSource>,
    pub orchestrator: Arc<Orchestrator>,
    pub default_page_size: usize,
    pub default_concurrency: usize,
    pub jobs: Arc<RwLock<HashMap<Uuid, JobStatus>>>,
}

impl AppState {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        orchestrator: Arc<Orchestrator>,
        default_page_size: usize,
        default_concurrency: usize,
    ) -> Self {
        Self {
            source,
            orchestrator,
            default_page_size,
            default_concurrency,
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn runner(&self) -> BatchRunner {
        BatchRunner::new(self.source.clone(), self.orchestrator.clone())
    }
}

/// Serve the trigger API until the process is stopped.
pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = create_router(state);

    tracing::info!("listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
