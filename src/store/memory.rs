//! In-memory dedup store for single-process operation and tests.
//!
//! State is not persisted across restarts. The check-and-write runs under a
//! single write lock, which gives the same at-most-once guarantee the
//! database backend gets from its unique key.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::models::{EnrichedDocument, StoredRecord};

use super::{DedupStore, StoreResult};

#[derive(Clone, Default)]
pub struct InMemoryDedupStore {
    records: Arc<RwLock<HashMap<String, StoredRecord>>>,
}

impl InMemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DedupStore for InMemoryDedupStore {
    async fn get(&self, fingerprint: &str) -> StoreResult<Option<StoredRecord>> {
        let records = self.records.read().await;
        Ok(records.get(fingerprint).cloned())
    }

    async fn upsert(
        &self,
        fingerprint: &str,
        document: &EnrichedDocument,
        force: bool,
    ) -> StoreResult<bool> {
        let mut records = self.records.write().await;

        match records.get_mut(fingerprint) {
            Some(existing) => {
                if force {
                    existing.payload = document.clone();
                    existing.last_updated_at = Utc::now();
                    existing.update_count += 1;
                }
                Ok(false)
            }
            None => {
                let now = Utc::now();
                records.insert(
                    fingerprint.to_string(),
                    StoredRecord {
                        fingerprint: fingerprint.to_string(),
                        payload: document.clone(),
                        first_seen_at: now,
                        last_updated_at: now,
                        update_count: 0,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn count(&self) -> StoreResult<u64> {
        let records = self.records.read().await;
        Ok(records.len() as u64)
    }
}
