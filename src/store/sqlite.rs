//! Diesel-based dedup store for SQLite.
//!
//! The fingerprint primary key enforces the at-most-one-row guarantee; the
//! upsert relies on `INSERT ... ON CONFLICT` so the existence check and the
//! write are a single atomic statement even across processes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::models::{EnrichedDocument, StoredRecord};

use super::pool::AsyncSqlitePool;
use super::schema::stored_documents;
use super::{DedupStore, StoreResult};

const CREATE_TABLE_SQL: &str = "\
CREATE TABLE IF NOT EXISTS stored_documents (
    fingerprint TEXT PRIMARY KEY NOT NULL,
    source_id TEXT NOT NULL,
    document_type TEXT NOT NULL,
    court TEXT NOT NULL,
    case_name TEXT NOT NULL,
    payload TEXT NOT NULL,
    completeness DOUBLE NOT NULL,
    first_seen_at TEXT NOT NULL,
    last_updated_at TEXT NOT NULL,
    update_count INTEGER NOT NULL DEFAULT 0
)";

#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = stored_documents)]
struct StoredDocumentRow {
    fingerprint: String,
    source_id: String,
    document_type: String,
    court: String,
    case_name: String,
    payload: String,
    completeness: f64,
    first_seen_at: String,
    last_updated_at: String,
    update_count: i32,
}

impl StoredDocumentRow {
    fn from_document(
        fingerprint: &str,
        document: &EnrichedDocument,
        now: DateTime<Utc>,
    ) -> StoreResult<Self> {
        Ok(Self {
            fingerprint: fingerprint.to_string(),
            source_id: document.source_id.clone(),
            document_type: document.document_type.as_str().to_string(),
            court: document.court.clone(),
            case_name: document.case_name.clone(),
            payload: serde_json::to_string(document)?,
            completeness: document.completeness,
            first_seen_at: now.to_rfc3339(),
            last_updated_at: now.to_rfc3339(),
            update_count: 0,
        })
    }

    fn into_record(self) -> StoreResult<StoredRecord> {
        let payload: EnrichedDocument = serde_json::from_str(&self.payload)?;
        Ok(StoredRecord {
            fingerprint: self.fingerprint,
            payload,
            first_seen_at: parse_datetime(&self.first_seen_at),
            last_updated_at: parse_datetime(&self.last_updated_at),
            update_count: self.update_count as i64,
        })
    }
}

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// SQLite-backed dedup store.
#[derive(Clone)]
pub struct SqliteDedupStore {
    pool: AsyncSqlitePool,
}

impl SqliteDedupStore {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Create the schema if it does not exist. Idempotent.
    pub async fn init_schema(&self) -> StoreResult<()> {
        let mut conn = self.pool.get().await?;
        diesel::sql_query(CREATE_TABLE_SQL).execute(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl DedupStore for SqliteDedupStore {
    async fn get(&self, fingerprint: &str) -> StoreResult<Option<StoredRecord>> {
        let mut conn = self.pool.get().await?;

        let row = stored_documents::table
            .find(fingerprint)
            .first::<StoredDocumentRow>(&mut conn)
            .await
            .optional()?;

        row.map(StoredDocumentRow::into_record).transpose()
    }

    async fn upsert(
        &self,
        fingerprint: &str,
        document: &EnrichedDocument,
        force: bool,
    ) -> StoreResult<bool> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now();
        let row = StoredDocumentRow::from_document(fingerprint, document, now)?;

        // Conflict-ignoring insert first: the affected-row count tells us
        // atomically whether this fingerprint is new.
        let inserted = diesel::insert_into(stored_documents::table)
            .values(&row)
            .on_conflict(stored_documents::fingerprint)
            .do_nothing()
            .execute(&mut conn)
            .await?;

        if inserted == 1 {
            return Ok(true);
        }
        if !force {
            return Ok(false);
        }

        diesel::update(stored_documents::table.find(fingerprint))
            .set((
                stored_documents::payload.eq(&row.payload),
                stored_documents::completeness.eq(row.completeness),
                stored_documents::last_updated_at.eq(now.to_rfc3339()),
                stored_documents::update_count.eq(stored_documents::update_count + 1),
            ))
            .execute(&mut conn)
            .await?;

        Ok(false)
    }

    async fn count(&self) -> StoreResult<u64> {
        let mut conn = self.pool.get().await?;

        use diesel::dsl::count_star;
        let count: i64 = stored_documents::table
            .select(count_star())
            .first(&mut conn)
            .await?;

        Ok(count as u64)
    }
}
