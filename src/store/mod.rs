//! Deduplicating document store.
//!
//! At most one stored row per fingerprint. The existence-check-and-write is
//! atomic in every backend, so two workers racing on the same fingerprint in
//! one batch still produce a single row; no in-process locks are involved.
//!
//! Two backends: in-memory (single process, tests) and SQLite via Diesel
//! (persisted, multi-process safe through the unique fingerprint key).

mod memory;
mod pool;
mod schema;
mod sqlite;

pub use memory::InMemoryDedupStore;
pub use pool::{AsyncSqlitePool, DieselError};
pub use sqlite::SqliteDedupStore;

use async_trait::async_trait;

use crate::models::{EnrichedDocument, StoredRecord};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from dedup store operations. All of these are fatal for the
/// document being processed; retries are the batch runner's decision.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<diesel::result::Error> for StoreError {
    fn from(e: diesel::result::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Storage keyed by fingerprint with an atomic upsert.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Fetch the stored record for a fingerprint, if any.
    async fn get(&self, fingerprint: &str) -> StoreResult<Option<StoredRecord>>;

    /// Insert or update the record for `fingerprint`.
    ///
    /// Returns `true` when no record existed before this call. With
    /// `force=false` an existing record is left completely untouched; with
    /// `force=true` the payload is overwritten and `update_count` bumped.
    async fn upsert(
        &self,
        fingerprint: &str,
        document: &EnrichedDocument,
        force: bool,
    ) -> StoreResult<bool>;

    /// Number of stored records.
    async fn count(&self) -> StoreResult<u64>;
}
