//! Durable settings storage with monotonic conditional writes.
//!
//! A store holds at most one row per key. Writes are accepted only when the
//! incoming `updated_at` does not precede the stored one, so a client still
//! holding an old copy cannot clobber a fresher value another client wrote.

mod memory;
mod redb_store;

pub use memory::MemoryStore;
pub use redb_store::RedbStore;

use async_trait::async_trait;

use crate::document::StoredDocument;
use crate::error::StoreError;
use crate::timestamp::Timestamp;

/// Result of a conditional upsert.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteOutcome {
    /// The row now holds the incoming document.
    Accepted,
    /// The stored row is newer and was left untouched.
    Rejected { stored: StoredDocument },
}

impl WriteOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, WriteOutcome::Accepted)
    }
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Read the row stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<StoredDocument>, StoreError>;

    /// Insert or replace the row keyed by `doc.id`, unless the stored row is
    /// strictly newer than `doc`.
    async fn upsert_if_newer(&self, doc: StoredDocument) -> Result<WriteOutcome, StoreError>;

    /// Read the row only if it changed strictly after `since`.
    async fn get_newer_than(
        &self,
        key: &str,
        since: Timestamp,
    ) -> Result<Option<StoredDocument>, StoreError> {
        Ok(self.get(key).await?.filter(|doc| doc.updated_at > since))
    }
}

/// The monotonic-write rule: ties go to the incoming write.
pub(crate) fn accepts(existing: Option<&StoredDocument>, incoming: &StoredDocument) -> bool {
    match existing {
        Some(stored) => incoming.updated_at >= stored.updated_at,
        None => true,
    }
}
