use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{accepts, SettingsStore, WriteOutcome};
use crate::document::StoredDocument;
use crate::error::StoreError;

/// Process-local store. Contents vanish with the process.
#[derive(Clone, Default)]
pub struct MemoryStore {
    rows: Arc<RwLock<HashMap<String, StoredDocument>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<StoredDocument>, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows.get(key).cloned())
    }

    async fn upsert_if_newer(&self, doc: StoredDocument) -> Result<WriteOutcome, StoreError> {
        // Hold the write lock across compare and insert.
        let mut rows = self.rows.write().await;
        if let Some(stored) = rows.get(&doc.id) {
            if !accepts(Some(stored), &doc) {
                return Ok(WriteOutcome::Rejected {
                    stored: stored.clone(),
                });
            }
        }
        rows.insert(doc.id.clone(), doc);
        Ok(WriteOutcome::Accepted)
    }
}
