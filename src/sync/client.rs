//! The sync coordinator.
//!
//! `SyncClient` decides when to talk to the server and runs one
//! request/response round at a time. Rounds are triggered by the debounce
//! timer after local edits, by an optional periodic task, and explicitly by
//! the application (login hydration, pull, direct push).
//!
//! Failures never escape: they are recorded in the client's status, the
//! affected scopes stay dirty, and the next trigger retries.

use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::cache;
use super::debounce::{Debouncer, FireFn, DEFAULT_DEBOUNCE};
use super::reconcile::Resolution;
use super::state::{SettingsChange, SettingsHolder};
use super::transport::SyncTransport;
use crate::config::ClientConfig;
use crate::document::{Defaults, Payload, Scope, SettingsDocument};
use crate::error::SyncError;
use crate::identity::{Identity, IdentityProvider};
use crate::protocol::{PushedDocument, PutSettingsBody, SyncKind, SyncRequest};
use crate::timestamp::{epoch, Clock, SystemClock, Timestamp};

/// Construction options for a `SyncClient`.
#[derive(Clone)]
pub struct SyncOptions {
    pub defaults: Defaults,
    pub clock: Arc<dyn Clock>,
    pub debounce: Duration,
    pub sync_interval: Option<Duration>,
    pub cache_path: Option<PathBuf>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            defaults: Defaults::default(),
            clock: Arc::new(SystemClock),
            debounce: DEFAULT_DEBOUNCE,
            sync_interval: None,
            cache_path: None,
        }
    }
}

impl SyncOptions {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            debounce: config.debounce(),
            sync_interval: config.sync_interval(),
            cache_path: config.cache_path.clone(),
            ..Default::default()
        }
    }
}

/// Why a round did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotSignedIn,
    InFlight,
    /// Local state was reset while the request was out; the response was
    /// dropped.
    SignedOutDuringRound,
}

/// What one round did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundReport {
    /// Pushed and confirmed; now synced.
    pub pushed: Vec<Scope>,
    /// Replaced by a newer server copy.
    pub applied: Vec<Scope>,
    /// Refused for lack of privileges; still dirty.
    pub unauthorized: Vec<Scope>,
    /// Dirty after the round (unauthorized, or edited mid-flight).
    pub still_dirty: Vec<Scope>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Skipped(SkipReason),
    Completed(RoundReport),
    Failed(SyncError),
}

impl SyncOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SyncOutcome::Completed(_))
    }
}

/// Snapshot for UI display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_syncing: bool,
    pub last_sync_time: Timestamp,
    pub last_error: Option<String>,
    pub dirty: Vec<Scope>,
}

/// Clears the in-flight flag however the round ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncClient {
    /// Identifies this client in logs.
    id: String,
    holder: SettingsHolder,
    transport: Arc<dyn SyncTransport>,
    identity: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    in_flight: AtomicBool,
    last_error: Mutex<Option<SyncError>>,
    periodic: Mutex<Option<JoinHandle<()>>>,
}

impl SyncClient {
    /// Build a client, restore its cache and start its background tasks.
    ///
    /// Must be called inside a Tokio runtime.
    pub async fn start(
        transport: Arc<dyn SyncTransport>,
        identity: Arc<dyn IdentityProvider>,
        options: SyncOptions,
    ) -> Arc<Self> {
        let client = Arc::new_cyclic(|weak: &Weak<SyncClient>| {
            let debouncer = Debouncer::spawn(options.debounce, debounce_target(weak.clone()));
            let mut holder =
                SettingsHolder::new(options.defaults.clone(), options.clock.clone(), debouncer);
            if let Some(ref path) = options.cache_path {
                holder = holder.with_cache(path.clone());
            }

            SyncClient {
                id: uuid::Uuid::new_v4().to_string(),
                holder,
                transport,
                identity,
                clock: options.clock.clone(),
                in_flight: AtomicBool::new(false),
                last_error: Mutex::new(None),
                periodic: Mutex::new(None),
            }
        });

        if let Some(ref path) = options.cache_path {
            match cache::load(path).await {
                Ok(Some(state)) => {
                    client.holder.restore(state).await;
                    // Unpushed edits from the last run go out without waiting
                    // for another edit.
                    if !client.holder.dirty_scopes().await.is_empty() {
                        client.holder.debouncer().arm();
                    }
                }
                Ok(None) => debug!("No settings cache at {}", path.display()),
                Err(e) => warn!("Ignoring unreadable settings cache: {}", e),
            }
        }

        if let Some(every) = options.sync_interval {
            client.spawn_periodic(every);
        }

        info!("[sync {}] client started", client.id);
        client
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn holder(&self) -> &SettingsHolder {
        &self.holder
    }

    pub async fn get(&self, scope: Scope) -> SettingsDocument {
        self.holder.get(scope).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SettingsChange> {
        self.holder.subscribe()
    }

    /// Record a user edit. Returns immediately; the push happens later.
    pub async fn update_local(&self, scope: Scope, partial: Payload) {
        self.holder.update_local(scope, &partial).await;
    }

    /// Adopt server state without scheduling a push.
    pub async fn apply_remote(
        &self,
        scope: Scope,
        remote: &Payload,
        remote_updated_at: Option<Timestamp>,
    ) {
        self.holder.apply_remote(scope, remote, remote_updated_at).await;
    }

    pub async fn reset(&self, scope: Scope) {
        self.holder.reset(scope).await;
    }

    /// Forget everything local: both documents, the sync point, the error.
    ///
    /// The identity provider is not touched; signing out of it is the
    /// caller's job.
    pub async fn sign_out(&self) {
        self.holder.reset_all().await;
        self.set_error(None);
        info!("[sync {}] local settings reset on sign-out", self.id);
    }

    pub async fn status(&self) -> SyncStatus {
        SyncStatus {
            is_syncing: self.in_flight.load(Ordering::Acquire),
            last_sync_time: self.holder.last_sync_time().await,
            last_error: self.last_error().map(|e| e.to_string()),
            dirty: self.holder.dirty_scopes().await,
        }
    }

    pub fn last_error(&self) -> Option<SyncError> {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Push dirty scopes and fetch newer ones, unless signed out or a round
    /// is already running.
    pub async fn sync_if_idle(&self) -> SyncOutcome {
        self.guarded_round(SyncKind::Full).await
    }

    /// Hydration round: push nothing and accept whatever the server holds.
    pub async fn sync_at_login(&self) -> SyncOutcome {
        self.guarded_round(SyncKind::Login).await
    }

    /// Refetch everything by forgetting the last sync point first.
    pub async fn pull(&self) -> SyncOutcome {
        self.holder.set_last_sync_time(epoch()).await;
        self.sync_if_idle().await
    }

    /// Load both documents from the read endpoint and apply them.
    pub async fn hydrate(&self) -> SyncOutcome {
        let Some(_identity) = self.identity.current_identity() else {
            return SyncOutcome::Skipped(SkipReason::NotSignedIn);
        };
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            return SyncOutcome::Skipped(SkipReason::InFlight);
        };

        let generation = self.holder.generation().await;
        let response = match self.transport.fetch_settings().await {
            Ok(response) => response,
            Err(e) => return self.fail_unless_reset(generation, e).await,
        };
        if !response.success {
            return self
                .fail_unless_reset(generation, server_failure(response.message))
                .await;
        }
        let Some(data) = response.data else {
            return self.fail(SyncError::MalformedResponse("missing data".to_string()));
        };

        let mut report = RoundReport::default();
        for scope in Scope::ALL {
            if let Some(remote) = data.for_scope(scope) {
                let resolution = self
                    .holder
                    .reconcile_remote(
                        scope,
                        &remote.settings,
                        remote.timestamp(),
                        SyncKind::Login,
                        generation,
                    )
                    .await;
                match resolution {
                    Some(_) => report.applied.push(scope),
                    None => return SyncOutcome::Skipped(SkipReason::SignedOutDuringRound),
                }
            }
        }
        report.still_dirty = self.holder.dirty_scopes().await;
        self.set_error(None);
        SyncOutcome::Completed(report)
    }

    /// Save one scope through its direct write endpoint.
    pub async fn push(&self, scope: Scope) -> SyncOutcome {
        let Some(identity) = self.identity.current_identity() else {
            return SyncOutcome::Skipped(SkipReason::NotSignedIn);
        };
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            return SyncOutcome::Skipped(SkipReason::InFlight);
        };

        if scope == Scope::Global && !identity.has_elevated_role() {
            return self.fail(SyncError::Unauthorized(scope));
        }

        let generation = self.holder.generation().await;
        let doc = self.holder.get(scope).await;
        let body = PutSettingsBody {
            settings: Some(doc.payload.clone()),
            updated_at: Some(Value::String(doc.updated_at.to_rfc3339_opts(
                chrono::SecondsFormat::AutoSi,
                true,
            ))),
        };
        let response = match self.transport.put_settings(scope, &body).await {
            Ok(response) => response,
            Err(e) => return self.fail_unless_reset(generation, e).await,
        };
        if !response.success {
            return self
                .fail_unless_reset(generation, server_failure(response.message))
                .await;
        }

        let mut report = RoundReport::default();
        let accepted = response.data.map(|d| d.accepted).unwrap_or(false);
        if accepted && self.holder.mark_synced_if_unchanged(scope, doc.revision).await {
            report.pushed.push(scope);
        } else if !accepted {
            // The next full round brings the newer server copy down.
            debug!("[sync {}] server kept a newer {} document", self.id, scope);
        }
        report.still_dirty = self.holder.dirty_scopes().await;
        self.set_error(None);
        SyncOutcome::Completed(report)
    }

    async fn guarded_round(&self, kind: SyncKind) -> SyncOutcome {
        let Some(identity) = self.identity.current_identity() else {
            debug!("[sync {}] not signed in, skipping sync", self.id);
            return SyncOutcome::Skipped(SkipReason::NotSignedIn);
        };
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            debug!("[sync {}] sync already in flight, skipping", self.id);
            return SyncOutcome::Skipped(SkipReason::InFlight);
        };
        self.run_round(kind, &identity).await
    }

    async fn run_round(&self, kind: SyncKind, identity: &Identity) -> SyncOutcome {
        let snapshot = self.holder.snapshot().await;
        let generation = snapshot.generation;
        // The next round asks for changes since this moment, so a write that
        // lands while the request is out is still reported next time.
        let started = self.clock.now();
        let mut request = SyncRequest {
            last_sync_time: Some(epoch()),
            kind,
            user_settings: None,
            global_settings: None,
        };
        let mut sent = Vec::new();
        let mut report = RoundReport::default();

        if kind == SyncKind::Full {
            request.last_sync_time = Some(snapshot.last_sync_time);
            for scope in snapshot.dirty_scopes() {
                if scope == Scope::Global && !identity.has_elevated_role() {
                    report.unauthorized.push(scope);
                    continue;
                }
                let doc = snapshot.doc(scope);
                let pushed = PushedDocument {
                    settings: doc.payload.clone(),
                    updated_at: doc.updated_at,
                };
                match scope {
                    Scope::User => request.user_settings = Some(pushed),
                    Scope::Global => request.global_settings = Some(pushed),
                }
                sent.push((scope, doc.revision));
            }
        }

        debug!(
            "[sync {}] {:?} round, pushing {:?}",
            self.id,
            kind,
            request.pushed_scopes()
        );

        let response = match self.transport.send(&request).await {
            Ok(response) => response,
            Err(e) => return self.fail_unless_reset(generation, e).await,
        };
        if self.holder.generation().await != generation {
            debug!(
                "[sync {}] local state reset during sync, dropping response",
                self.id
            );
            return SyncOutcome::Skipped(SkipReason::SignedOutDuringRound);
        }
        if !response.success {
            return self.fail(server_failure(response.message));
        }
        let Some(data) = response.data else {
            return self.fail(SyncError::MalformedResponse("missing data".to_string()));
        };

        for (scope, revision) in sent {
            if data.rejected.contains(&scope) {
                report.unauthorized.push(scope);
            } else if self.holder.mark_synced_if_unchanged(scope, revision).await {
                report.pushed.push(scope);
            }
        }

        for scope in Scope::ALL {
            if let Some(remote) = data.unsynced(scope) {
                let resolution = self
                    .holder
                    .reconcile_remote(
                        scope,
                        &remote.settings,
                        remote.timestamp(),
                        kind,
                        generation,
                    )
                    .await;
                match resolution {
                    Some(Resolution::ApplyRemote) => report.applied.push(scope),
                    Some(_) => {}
                    None => return SyncOutcome::Skipped(SkipReason::SignedOutDuringRound),
                }
            }
        }

        if !self.holder.finish_round(generation, started).await {
            return SyncOutcome::Skipped(SkipReason::SignedOutDuringRound);
        }
        report.still_dirty = self.holder.dirty_scopes().await;

        match report.unauthorized.first() {
            Some(scope) => {
                let err = SyncError::Unauthorized(*scope);
                warn!("[sync {}] {}", self.id, err);
                self.set_error(Some(err));
            }
            None => self.set_error(None),
        }

        // An edit that landed mid-flight had its timer fire into a busy
        // client; give it another chance now that we are idle.
        if report
            .still_dirty
            .iter()
            .any(|scope| !report.unauthorized.contains(scope))
        {
            debug!("[sync {}] edits arrived during sync, re-arming", self.id);
            self.holder.debouncer().arm();
        }

        debug!("[sync {}] round complete: {:?}", self.id, report);
        SyncOutcome::Completed(report)
    }

    fn fail(&self, err: SyncError) -> SyncOutcome {
        warn!("[sync {}] sync failed: {}", self.id, err);
        self.set_error(Some(err.clone()));
        SyncOutcome::Failed(err)
    }

    /// A failure after sign-out belongs to the old session; don't record it.
    async fn fail_unless_reset(&self, generation: u64, err: SyncError) -> SyncOutcome {
        if self.holder.generation().await != generation {
            debug!("[sync {}] ignoring failure from before sign-out: {}", self.id, err);
            return SyncOutcome::Skipped(SkipReason::SignedOutDuringRound);
        }
        self.fail(err)
    }

    fn set_error(&self, err: Option<SyncError>) {
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = err;
    }

    /// Run `sync_if_idle` every `every` until the client is dropped.
    fn spawn_periodic(self: &Arc<Self>, every: Duration) {
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(client) = weak.upgrade() else {
                    return;
                };
                client.sync_if_idle().await;
            }
        });
        *self.periodic.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        if let Some(handle) = self
            .periodic
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

fn debounce_target(client: Weak<SyncClient>) -> FireFn {
    Arc::new(move || {
        let client = client.clone();
        Box::pin(async move {
            if let Some(client) = client.upgrade() {
                client.sync_if_idle().await;
            }
        })
    })
}

fn server_failure(message: Option<String>) -> SyncError {
    SyncError::Transport(message.unwrap_or_else(|| "server reported failure".to_string()))
}
