//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to the pipeline.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use console::style;
use tokio::sync::{mpsc, watch};

use crate::config::Settings;
use crate::pipeline::{BatchRunReport, BatchRunner, Orchestrator, RunOptions};
use crate::rate_limit::TokenBucket;
use crate::search::{HttpSearchIndex, NullSearchIndex, SearchIndex};
use crate::server::{self, AppState};
use crate::source::{DocumentSource, HttpDocumentSource, SourceQuery};
use crate::stages::{ProviderSet, StageRegistry};
use crate::store::{AsyncSqlitePool, DedupStore, SqliteDedupStore};

use super::progress::BatchProgress;

#[derive(Parser)]
#[command(name = "lex")]
#[command(about = "Court document ingestion and enrichment pipeline")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// Run an ingestion batch against the document source
    Run {
        /// Restrict to one court (e.g. "txed")
        #[arg(long)]
        court: Option<String>,
        /// Only documents filed on or after this date (YYYY-MM-DD)
        #[arg(long)]
        filed_after: Option<chrono::NaiveDate>,
        /// Only documents filed on or before this date (YYYY-MM-DD)
        #[arg(long)]
        filed_before: Option<chrono::NaiveDate>,
        /// Stop after this many documents (0 = until source exhausted)
        #[arg(short, long, default_value = "0")]
        max_documents: usize,
        /// Re-enrich and overwrite documents that are already stored
        #[arg(short, long)]
        force: bool,
        /// Fail documents whose expected stages fail
        #[arg(long)]
        strict: bool,
        /// Number of pipeline workers
        #[arg(long)]
        concurrency: Option<usize>,
        /// Show a progress bar
        #[arg(short = 'P', long)]
        progress: bool,
    },

    /// Show store statistics
    Status,

    /// Serve the batch trigger API
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1:8600")]
        bind: SocketAddr,
    },
}

/// Parse arguments and dispatch.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Init => cmd_init(&settings).await,
        Commands::Run {
            court,
            filed_after,
            filed_before,
            max_documents,
            force,
            strict,
            concurrency,
            progress,
        } => {
            let query = SourceQuery {
                court,
                filed_after,
                filed_before,
            };
            let opts = RunOptions {
                concurrency: concurrency.unwrap_or(settings.pipeline.concurrency),
                max_documents: (max_documents > 0).then_some(max_documents),
                page_size: settings.source.page_size,
                force,
                strict: strict || settings.pipeline.strict,
            };
            cmd_run(&settings, query, opts, progress).await
        }
        Commands::Status => cmd_status(&settings).await,
        Commands::Serve { bind } => cmd_serve(&settings, bind).await,
    }
}

/// Build the store backend from settings.
async fn open_store(settings: &Settings) -> anyhow::Result<Arc<dyn DedupStore>> {
    let db_path = settings.storage.database_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = SqliteDedupStore::new(AsyncSqlitePool::from_path(&db_path));
    store.init_schema().await?;
    Ok(Arc::new(store))
}

fn build_search(settings: &Settings) -> anyhow::Result<Arc<dyn SearchIndex>> {
    match &settings.search.endpoint {
        Some(endpoint) => Ok(Arc::new(HttpSearchIndex::new(
            endpoint,
            std::time::Duration::from_secs(settings.source.request_timeout_secs),
            settings.search.push_attempts,
        )?)),
        None => Ok(Arc::new(NullSearchIndex)),
    }
}

fn build_source(settings: &Settings) -> anyhow::Result<Arc<dyn DocumentSource>> {
    let bucket = TokenBucket::new(settings.rate_limit_config());
    let source = HttpDocumentSource::new(settings.source_client_config()?, bucket)?;
    Ok(Arc::new(source))
}

fn build_orchestrator(
    settings: &Settings,
    store: Arc<dyn DedupStore>,
) -> anyhow::Result<Arc<Orchestrator>> {
    let search = build_search(settings)?;
    Ok(Arc::new(Orchestrator::new(
        StageRegistry::standard(ProviderSet::default()),
        store,
        search,
        settings.stage_timeout(),
    )))
}

async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    let data_dir = settings.storage.data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let _ = open_store(settings).await?;
    println!(
        "{} Initialized data directory at {}",
        style("✓").green(),
        data_dir.display()
    );
    Ok(())
}

async fn cmd_run(
    settings: &Settings,
    query: SourceQuery,
    opts: RunOptions,
    progress: bool,
) -> anyhow::Result<()> {
    let store = open_store(settings).await?;
    let orchestrator = build_orchestrator(settings, store)?;
    let source = build_source(settings)?;
    let runner = BatchRunner::new(source, orchestrator);

    // Ctrl-C flips the cancellation signal; in-flight documents finish,
    // nothing new is dispatched.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("cancellation requested, finishing in-flight work");
            let _ = cancel_tx.send(true);
        }
    });

    let (event_tx, progress_task) = if progress {
        let (tx, rx) = mpsc::channel(64);
        let task = tokio::spawn(BatchProgress::new().drive(rx));
        (Some(tx), Some(task))
    } else {
        (None, None)
    };

    let report = runner.run(query, opts, cancel_rx, event_tx).await?;
    if let Some(task) = progress_task {
        let _ = task.await;
    }

    print_report(&report);
    Ok(())
}

fn print_report(report: &BatchRunReport) {
    let marker = if report.cancelled {
        style("⚠ cancelled").yellow().to_string()
    } else {
        style("✓ complete").green().to_string()
    };
    println!("\nBatch {}", marker);
    println!("  candidates:  {}", report.total_candidates);
    println!("  new:         {}", report.new_documents);
    println!("  updated:     {}", report.updated_documents);
    println!("  duplicates:  {}", report.duplicates);
    println!("  failed:      {}", report.failed_documents);
    println!(
        "  avg completeness: {:.0}%",
        report.average_completeness * 100.0
    );

    if !report.stage_stats.is_empty() {
        println!("\n  stages:");
        for (name, stats) in &report.stage_stats {
            println!(
                "    {:<24} {} ok / {} failed / {} skipped",
                name, stats.succeeded, stats.failed, stats.skipped
            );
        }
    }

    for error in &report.errors {
        let target = error
            .document_id
            .as_deref()
            .or(error.cursor.as_deref())
            .unwrap_or("batch");
        println!(
            "  {} [{}] {}: {}",
            style("✗").red(),
            error.kind.as_str(),
            target,
            error.detail
        );
    }
}

async fn cmd_status(settings: &Settings) -> anyhow::Result<()> {
    let store = open_store(settings).await?;
    let count = store.count().await?;
    println!("{} stored documents: {}", style("→").cyan(), count);
    println!("  database: {}", settings.storage.database_path().display());
    Ok(())
}

async fn cmd_serve(settings: &Settings, bind: SocketAddr) -> anyhow::Result<()> {
    let store = open_store(settings).await?;
    let orchestrator = build_orchestrator(settings, store)?;
    let source = build_source(settings)?;

    let state = AppState::new(
        source,
        orchestrator,
        settings.source.page_size,
        settings.pipeline.concurrency,
    );

    println!(
        "{} Starting lexingest trigger API at http://{}",
        style("→").cyan(),
        bind
    );
    println!("  Press Ctrl+C to stop");

    server::serve(state, bind).await
}
