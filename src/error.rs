//! Error types shared by the server and the sync client.

use crate::document::Scope;

/// Failure of a sync round-trip, as seen by the client.
///
/// None of these escape the sync coordinator: they are recorded in the
/// client's status and the affected scopes stay dirty for the next attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// No identity available. Sync is skipped rather than attempted.
    #[error("not signed in")]
    Unauthenticated,
    /// The identity may not push this scope.
    #[error("not allowed to update {0} settings")]
    Unauthorized(Scope),
    /// Network failure, timeout or non-success status.
    #[error("Sync failed. Try again. ({0})")]
    Transport(String),
    /// The server answered with something we could not interpret.
    #[error("Sync failed. Try again. (malformed response: {0})")]
    MalformedResponse(String),
}

impl SyncError {
    /// Transport-class failures are retried by the next trigger.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transport(_) | SyncError::MalformedResponse(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SyncError::MalformedResponse(e.to_string())
        } else {
            SyncError::Transport(e.to_string())
        }
    }
}

/// Error from a settings store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] redb::Error),
    #[error("stored document is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

macro_rules! redb_into_store_error {
    ($($ty:ty),*) => {
        $(impl From<$ty> for StoreError {
            fn from(e: $ty) -> Self {
                StoreError::Database(e.into())
            }
        })*
    };
}

redb_into_store_error!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError
);

/// Error reading or writing the client's local cache file.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("failed to access cache file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse cache file: {0}")]
    Parse(#[from] serde_json::Error),
}
