//! lexingest - court document ingestion and enrichment pipeline.
//!
//! A tool for ingesting, enriching, and deduplicating court documents from
//! external document APIs.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lexingest::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    // Initialize logging based on verbosity
    let default_filter = if cli::is_verbose() {
        "lexingest=info"
    } else {
        "lexingest=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Run CLI
    cli::run().await
}
