//! lexingest - court document ingestion and enrichment pipeline.
//!
//! Fetches court documents from a paginated source API, runs them through an
//! ordered sequence of enrichment stages, and persists deduplicated,
//! quality-scored results keyed by content fingerprint.

pub mod cli;
pub mod config;
pub mod fingerprint;
pub mod models;
pub mod pipeline;
pub mod rate_limit;
pub mod search;
pub mod server;
pub mod source;
pub mod stages;
pub mod store;
