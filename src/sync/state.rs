//! Local settings state for the sync client.
//!
//! This module contains the `SettingsHolder` that owns the client's copy of
//! both settings documents and mediates every read and write to them.
//!
//! Key mechanisms:
//! - **Local edits** (`update_local`): stamp the document, mark it dirty and
//!   arm the debounce timer so the change is pushed.
//! - **Remote application** (`apply_remote`): adopt server truth and mark the
//!   document synced. This never arms the timer, which is what keeps applied
//!   server state from being pushed straight back.
//! - **Revisions**: every local edit bumps a counter. A push only clears the
//!   dirty flag if the counter still matches what was sent, so an edit made
//!   while a request was in flight is never marked synced by mistake.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use super::cache;
use super::debounce::Debouncer;
use super::reconcile::{reconcile, Resolution};
use crate::document::{merge_shallow, Defaults, Payload, Scope, SettingsDocument};
use crate::protocol::SyncKind;
use crate::timestamp::{epoch, Clock, Timestamp};

/// Both documents plus the client's last sync point.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsState {
    pub user: SettingsDocument,
    pub global: SettingsDocument,
    /// When the last successful round completed, by the local clock.
    #[serde(default = "epoch")]
    pub last_sync_time: Timestamp,
    /// Bumped on sign-out. A round started under an older generation must
    /// not write anything back.
    #[serde(skip)]
    pub generation: u64,
}

impl SettingsState {
    pub fn new(defaults: &Defaults) -> Self {
        Self {
            user: SettingsDocument::new(Scope::User, defaults),
            global: SettingsDocument::new(Scope::Global, defaults),
            last_sync_time: epoch(),
            generation: 0,
        }
    }

    pub fn doc(&self, scope: Scope) -> &SettingsDocument {
        match scope {
            Scope::User => &self.user,
            Scope::Global => &self.global,
        }
    }

    pub fn doc_mut(&mut self, scope: Scope) -> &mut SettingsDocument {
        match scope {
            Scope::User => &mut self.user,
            Scope::Global => &mut self.global,
        }
    }

    pub fn dirty_scopes(&self) -> Vec<Scope> {
        Scope::ALL
            .into_iter()
            .filter(|scope| self.doc(*scope).is_dirty())
            .collect()
    }
}

/// What caused a document to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    Local,
    Remote,
    Reset,
}

/// Broadcast to subscribers after every change.
#[derive(Debug, Clone)]
pub struct SettingsChange {
    pub scope: Scope,
    pub origin: ChangeOrigin,
    pub document: SettingsDocument,
}

/// Owner of the client's settings documents.
///
/// Shared between the application (edits, reads) and the sync coordinator
/// (building requests, applying responses).
pub struct SettingsHolder {
    state: RwLock<SettingsState>,
    defaults: Defaults,
    clock: Arc<dyn Clock>,
    debouncer: Debouncer,
    changes: broadcast::Sender<SettingsChange>,
    cache_path: Option<PathBuf>,
}

impl SettingsHolder {
    pub fn new(defaults: Defaults, clock: Arc<dyn Clock>, debouncer: Debouncer) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            state: RwLock::new(SettingsState::new(&defaults)),
            defaults,
            clock,
            debouncer,
            changes,
            cache_path: None,
        }
    }

    /// Persist every change to `path`.
    pub fn with_cache(mut self, path: PathBuf) -> Self {
        self.cache_path = Some(path);
        self
    }

    pub fn defaults(&self) -> &Defaults {
        &self.defaults
    }

    pub fn debouncer(&self) -> &Debouncer {
        &self.debouncer
    }

    /// Receive every subsequent change, local or remote.
    pub fn subscribe(&self) -> broadcast::Receiver<SettingsChange> {
        self.changes.subscribe()
    }

    pub async fn get(&self, scope: Scope) -> SettingsDocument {
        self.state.read().await.doc(scope).clone()
    }

    pub async fn snapshot(&self) -> SettingsState {
        self.state.read().await.clone()
    }

    pub async fn dirty_scopes(&self) -> Vec<Scope> {
        self.state.read().await.dirty_scopes()
    }

    pub async fn last_sync_time(&self) -> Timestamp {
        self.state.read().await.last_sync_time
    }

    pub async fn generation(&self) -> u64 {
        self.state.read().await.generation
    }

    pub async fn set_last_sync_time(&self, at: Timestamp) {
        let mut state = self.state.write().await;
        state.last_sync_time = at;
        self.persist(&state).await;
    }

    /// Apply a user edit: shallow-merge `partial`, stamp, mark dirty, arm
    /// the debouncer. An empty patch is ignored. Returns whether anything
    /// changed.
    pub async fn update_local(&self, scope: Scope, partial: &Payload) -> bool {
        if partial.is_empty() {
            return false;
        }

        let mut state = self.state.write().await;
        let doc = state.doc_mut(scope);
        merge_shallow(&mut doc.payload, partial);
        // Never step backwards, even if the wall clock does.
        doc.updated_at = self.clock.now().max(doc.updated_at);
        doc.synced = false;
        doc.revision += 1;
        debug!(
            "Local {} edit (revision {}, {} field(s))",
            scope,
            doc.revision,
            partial.len()
        );
        let change = SettingsChange {
            scope,
            origin: ChangeOrigin::Local,
            document: doc.clone(),
        };
        self.persist(&state).await;
        drop(state);

        let _ = self.changes.send(change);
        self.debouncer.arm();
        true
    }

    /// Adopt a server copy: defaults overlaid with `remote`, stamped with the
    /// remote timestamp (or now, if there is none), marked synced.
    ///
    /// Does not arm the debouncer.
    pub async fn apply_remote(
        &self,
        scope: Scope,
        remote: &Payload,
        remote_updated_at: Option<Timestamp>,
    ) {
        let mut state = self.state.write().await;
        let change = self.apply_locked(&mut state, scope, remote, remote_updated_at);
        self.persist(&state).await;
        drop(state);

        let _ = self.changes.send(change);
    }

    /// Record the end of a round started at `started`, unless the state was
    /// reset since `generation` was read.
    pub async fn finish_round(&self, generation: u64, started: Timestamp) -> bool {
        let mut state = self.state.write().await;
        if state.generation != generation {
            return false;
        }
        state.last_sync_time = started;
        self.persist(&state).await;
        true
    }

    /// Reconcile a server copy against the current local one and apply it if
    /// it wins. Decision and application happen under one lock so a
    /// concurrent local edit is either fully before or fully after.
    ///
    /// Returns `None` without touching anything when the state was reset
    /// since `generation` was read.
    pub async fn reconcile_remote(
        &self,
        scope: Scope,
        remote: &Payload,
        remote_updated_at: Option<Timestamp>,
        kind: SyncKind,
        generation: u64,
    ) -> Option<Resolution> {
        let mut state = self.state.write().await;
        if state.generation != generation {
            debug!("Dropping server {} settings from before sign-out", scope);
            return None;
        }
        let local = state.doc(scope);
        let resolution = reconcile(local.updated_at, remote_updated_at, kind);

        match resolution {
            Resolution::ApplyRemote => {
                if kind == SyncKind::Full && local.is_dirty() {
                    warn!(
                        "Newer server {} settings replace unpushed local edits (revision {})",
                        scope, local.revision
                    );
                }
                let change = self.apply_locked(&mut state, scope, remote, remote_updated_at);
                self.persist(&state).await;
                drop(state);
                let _ = self.changes.send(change);
            }
            Resolution::AlreadyConsistent => {
                debug!("Server {} settings match local timestamp", scope);
            }
            Resolution::KeepLocal => {
                debug!("Discarding older server {} settings", scope);
            }
        }
        Some(resolution)
    }

    fn apply_locked(
        &self,
        state: &mut SettingsState,
        scope: Scope,
        remote: &Payload,
        remote_updated_at: Option<Timestamp>,
    ) -> SettingsChange {
        let mut payload = self.defaults.for_scope(scope).clone();
        merge_shallow(&mut payload, remote);

        let doc = state.doc_mut(scope);
        doc.payload = payload;
        doc.updated_at = remote_updated_at.unwrap_or_else(|| self.clock.now());
        doc.synced = true;
        debug!("Applied remote {} settings stamped {}", scope, doc.updated_at);

        SettingsChange {
            scope,
            origin: ChangeOrigin::Remote,
            document: doc.clone(),
        }
    }

    /// Clear the dirty flag, unless the document was edited after
    /// `revision` was read.
    pub async fn mark_synced_if_unchanged(&self, scope: Scope, revision: u64) -> bool {
        let mut state = self.state.write().await;
        let doc = state.doc_mut(scope);
        if doc.revision != revision {
            debug!(
                "{} settings changed during sync (revision {} -> {}), staying dirty",
                scope, revision, doc.revision
            );
            return false;
        }
        doc.synced = true;
        self.persist(&state).await;
        true
    }

    /// Back to defaults at epoch, nothing to push.
    pub async fn reset(&self, scope: Scope) {
        let mut state = self.state.write().await;
        let change = self.reset_locked(&mut state, scope);
        self.persist(&state).await;
        drop(state);

        let _ = self.changes.send(change);
    }

    fn reset_locked(&self, state: &mut SettingsState, scope: Scope) -> SettingsChange {
        let revision = state.doc(scope).revision;
        let doc = state.doc_mut(scope);
        *doc = SettingsDocument::new(scope, &self.defaults);
        // Keep counting so a push built before the reset cannot match.
        doc.revision = revision + 1;
        SettingsChange {
            scope,
            origin: ChangeOrigin::Reset,
            document: doc.clone(),
        }
    }

    /// Reset both documents, forget the last sync point, start a new
    /// generation and drop the cache file. A round still in flight finds the
    /// generation changed and discards its response.
    pub async fn reset_all(&self) {
        let mut state = self.state.write().await;
        let changes: Vec<_> = Scope::ALL
            .into_iter()
            .map(|scope| self.reset_locked(&mut state, scope))
            .collect();
        state.last_sync_time = epoch();
        state.generation += 1;
        if let Some(ref path) = self.cache_path {
            if let Err(e) = cache::remove(path).await {
                warn!("Failed to remove settings cache: {}", e);
            }
        }
        drop(state);

        for change in changes {
            let _ = self.changes.send(change);
        }
    }

    /// Replace the whole state, typically from the on-disk cache. Dirty
    /// flags are kept so unpushed edits survive a restart.
    pub async fn restore(&self, restored: SettingsState) {
        let mut state = self.state.write().await;
        let generation = state.generation;
        *state = restored;
        state.generation = generation;
        debug!("Restored local settings, dirty: {:?}", state.dirty_scopes());
    }

    async fn persist(&self, state: &SettingsState) {
        if let Some(ref path) = self.cache_path {
            if let Err(e) = cache::save(path, state).await {
                warn!("Failed to save settings cache: {}", e);
            }
        }
    }
}
