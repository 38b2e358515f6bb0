//! Settings synchronization between clients and a server.
//!
//! Two documents are kept consistent: per-user settings and one global
//! settings document. Clients edit locally first and reconcile later with
//! whole-document last-write-wins; the server's store refuses writes that
//! would move a document's timestamp backwards.

pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod document;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod store;
pub mod sync;
pub mod timestamp;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::ApiState;
use crate::auth::{Authenticator, TokenAuthenticator};
use crate::store::{MemoryStore, SettingsStore};
use crate::timestamp::{Clock, SystemClock};

/// Everything the HTTP router needs.
#[derive(Clone)]
pub struct RouterConfig {
    pub store: Arc<dyn SettingsStore>,
    pub auth: Arc<dyn Authenticator>,
    pub clock: Arc<dyn Clock>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            auth: Arc::new(TokenAuthenticator::default()),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Router over an in-memory store with no known tokens.
pub fn create_router() -> Router {
    create_router_with_config(RouterConfig::default())
}

pub fn create_router_with_config(config: RouterConfig) -> Router {
    let state = ApiState {
        store: config.store,
        auth: config.auth,
        clock: config.clock,
    };

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .merge(api::router(state))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
