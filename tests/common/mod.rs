//! In-process transport that drives the real router, plus fixtures.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use prefsync::auth::TokenAuthenticator;
use prefsync::document::Scope;
use prefsync::error::SyncError;
use prefsync::identity::{Identity, Role};
use prefsync::protocol::{
    PutSettingsBody, PutSettingsResponse, SettingsResponse, SyncRequest, SyncResponse,
};
use prefsync::store::MemoryStore;
use prefsync::sync::SyncTransport;
use prefsync::timestamp::{SystemClock, Timestamp};
use prefsync::{create_router_with_config, RouterConfig};
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tower::util::ServiceExt;

pub const USER_TOKEN: &str = "user-token";
pub const ADMIN_TOKEN: &str = "admin-token";

pub fn ts(secs: i64) -> Timestamp {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// A router over `store` that knows alice (user) and root (admin).
pub fn test_router(store: Arc<MemoryStore>) -> Router {
    let auth = TokenAuthenticator::default()
        .with_token(USER_TOKEN, Identity::new("alice", Role::User))
        .with_token(ADMIN_TOKEN, Identity::new("root", Role::Admin));
    create_router_with_config(RouterConfig {
        store,
        auth: Arc::new(auth),
        clock: Arc::new(SystemClock),
    })
}

/// Calls the router directly, counting and recording sync requests.
pub struct LoopbackTransport {
    router: Router,
    token: String,
    offline: AtomicBool,
    gate: Option<Semaphore>,
    sync_calls: AtomicUsize,
    requests: Mutex<Vec<SyncRequest>>,
}

impl LoopbackTransport {
    pub fn new(router: Router, token: &str) -> Self {
        Self {
            router,
            token: token.to_string(),
            offline: AtomicBool::new(false),
            gate: None,
            sync_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every call waits for a permit from `release`.
    pub fn gated(router: Router, token: &str) -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new(router, token)
        }
    }

    pub fn release(&self, calls: usize) {
        if let Some(ref gate) = self.gate {
            gate.add_permits(calls);
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn sync_calls(&self) -> usize {
        self.sync_calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<SyncRequest> {
        self.requests.lock().unwrap().clone()
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        uri: &str,
        body: Option<Vec<u8>>,
        scope: Scope,
    ) -> Result<T, SyncError> {
        if let Some(ref gate) = self.gate {
            gate.acquire()
                .await
                .map_err(|e| SyncError::Transport(e.to_string()))?
                .forget();
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::Transport("connection refused".to_string()));
        }

        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {}", self.token))
            .header("content-type", "application/json")
            .body(Body::from(body.unwrap_or_default()))
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED => return Err(SyncError::Unauthenticated),
            StatusCode::FORBIDDEN => return Err(SyncError::Unauthorized(scope)),
            status if !status.is_success() => {
                return Err(SyncError::Transport(format!("HTTP {}", status)))
            }
            _ => {}
        }
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?
            .to_bytes();
        serde_json::from_slice(&bytes).map_err(|e| SyncError::MalformedResponse(e.to_string()))
    }
}

#[async_trait]
impl SyncTransport for LoopbackTransport {
    async fn send(&self, request: &SyncRequest) -> Result<SyncResponse, SyncError> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let body = serde_json::to_vec(request).map_err(|e| SyncError::Transport(e.to_string()))?;
        self.call(Method::POST, "/api/sync", Some(body), Scope::Global)
            .await
    }

    async fn fetch_settings(&self) -> Result<SettingsResponse, SyncError> {
        self.call(Method::GET, "/api/settings", None, Scope::User)
            .await
    }

    async fn put_settings(
        &self,
        scope: Scope,
        body: &PutSettingsBody,
    ) -> Result<PutSettingsResponse, SyncError> {
        let body = serde_json::to_vec(body).map_err(|e| SyncError::Transport(e.to_string()))?;
        let uri = format!("/api/settings/{}", scope);
        self.call(Method::PUT, &uri, Some(body), scope).await
    }
}
