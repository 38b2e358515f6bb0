use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;

use super::{accepts, SettingsStore, WriteOutcome};
use crate::document::StoredDocument;
use crate::error::StoreError;

/// key → JSON-encoded `StoredDocument`
const SETTINGS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("settings");

/// On-disk store backed by a redb database file.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open (or create) the database at `path` and make sure the table exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref())?;

        let txn = db.begin_write()?;
        txn.open_table(SETTINGS_TABLE)?;
        txn.commit()?;

        tracing::info!("Opened settings database at {}", path.as_ref().display());
        Ok(Self { db: Arc::new(db) })
    }

    fn read_row(&self, key: &str) -> Result<Option<StoredDocument>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS_TABLE)?;
        let row = match table.get(key)? {
            Some(guard) => Some(serde_json::from_str(guard.value())?),
            None => None,
        };
        Ok(row)
    }

    fn write_row(&self, doc: StoredDocument) -> Result<WriteOutcome, StoreError> {
        let encoded = serde_json::to_string(&doc)?;
        let txn = self.db.begin_write()?;
        let outcome = {
            let mut table = txn.open_table(SETTINGS_TABLE)?;
            let existing: Option<StoredDocument> = match table.get(doc.id.as_str())? {
                Some(guard) => Some(serde_json::from_str(guard.value())?),
                None => None,
            };

            match existing {
                Some(stored) if !accepts(Some(&stored), &doc) => {
                    WriteOutcome::Rejected { stored }
                }
                _ => {
                    table.insert(doc.id.as_str(), encoded.as_str())?;
                    WriteOutcome::Accepted
                }
            }
        };
        txn.commit()?;
        Ok(outcome)
    }
}

#[async_trait]
impl SettingsStore for RedbStore {
    async fn get(&self, key: &str) -> Result<Option<StoredDocument>, StoreError> {
        let store = self.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || store.read_row(&key))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }

    async fn upsert_if_newer(&self, doc: StoredDocument) -> Result<WriteOutcome, StoreError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.write_row(doc))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }
}
