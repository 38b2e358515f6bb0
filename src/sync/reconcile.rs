//! Whole-document last-write-wins between a local and a server copy.
//!
//! There is no per-field merge: when two clients edit different fields of
//! the same document concurrently, one of the edits is dropped.

use crate::protocol::SyncKind;
use crate::timestamp::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Server copy wins and replaces the local document.
    ApplyRemote,
    /// Same timestamp on both sides; nothing to do.
    AlreadyConsistent,
    /// Local copy is newer (or the server copy is unreadable) and is kept.
    KeepLocal,
}

/// Decide which copy of a scope survives a sync round.
///
/// A login round accepts the server copy unconditionally, as if the local
/// document were stamped at epoch. Otherwise the server copy wins only when
/// strictly newer; a server copy without a readable timestamp cannot prove
/// that and is discarded.
pub fn reconcile(local: Timestamp, remote: Option<Timestamp>, kind: SyncKind) -> Resolution {
    if kind == SyncKind::Login {
        return Resolution::ApplyRemote;
    }
    match remote {
        Some(remote) if remote > local => Resolution::ApplyRemote,
        Some(remote) if remote == local => Resolution::AlreadyConsistent,
        _ => Resolution::KeepLocal,
    }
}
