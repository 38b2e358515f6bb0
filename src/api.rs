use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::auth::Authenticator;
use crate::document::{Scope, StoredDocument};
use crate::error::StoreError;
use crate::identity::Identity;
use crate::protocol::{
    PutSettingsBody, PutSettingsData, PutSettingsResponse, SettingsData, SettingsResponse,
    SyncData, SyncKind, SyncRequest, SyncResponse,
};
use crate::store::{SettingsStore, WriteOutcome};
use crate::timestamp::{self, Clock};

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn SettingsStore>,
    pub auth: Arc<dyn Authenticator>,
    pub clock: Arc<dyn Clock>,
}

impl ApiState {
    fn identify(&self, headers: &HeaderMap) -> Result<Identity, ApiError> {
        self.auth.authenticate(headers).ok_or(ApiError::Unauthenticated)
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/sync", post(sync))
        .route("/api/settings", get(get_settings))
        .route("/api/settings/user", put(put_user_settings))
        .route("/api/settings/global", put(put_global_settings))
        .with_state(state)
}

/// Failure of an API request, rendered as `{ success: false, message }`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthenticated,
    #[error("Forbidden")]
    Forbidden,
    #[error("{0}")]
    BadRequest(String),
    #[error("Internal Server Error")]
    Store(#[from] StoreError),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(e) => {
                error!("Settings store failure: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = json!({ "success": false, "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}

async fn sync(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Result<Json<SyncRequest>, JsonRejection>,
) -> Result<Json<SyncResponse>, ApiError> {
    let identity = state.identify(&headers)?;
    let Json(body) = body?;
    debug!(
        "POST /api/sync: {} round for {}, pushing {:?}",
        match body.kind {
            SyncKind::Login => "login",
            SyncKind::Full => "full",
        },
        identity.id,
        body.pushed_scopes()
    );

    // Login rounds report everything the server has.
    let since = match body.kind {
        SyncKind::Login => timestamp::epoch(),
        SyncKind::Full => body.last_sync_time.unwrap_or_else(timestamp::epoch),
    };

    let mut data = SyncData::default();
    for scope in Scope::ALL {
        let key = scope.storage_key(&identity.id);
        let mut refused_by_newer = None;

        if body.kind == SyncKind::Full {
            if let Some(pushed) = body.pushed(scope) {
                if scope == Scope::Global && !identity.has_elevated_role() {
                    warn!(
                        "POST /api/sync: {} may not write global settings",
                        identity.id
                    );
                    data.rejected.push(scope);
                } else {
                    let doc = StoredDocument {
                        id: key.clone(),
                        settings: pushed.settings.clone(),
                        updated_at: pushed.updated_at,
                    };
                    match state.store.upsert_if_newer(doc).await? {
                        WriteOutcome::Accepted => debug!("Stored {} settings ({})", scope, key),
                        WriteOutcome::Rejected { stored } => {
                            debug!(
                                "Kept newer {} settings ({} > {})",
                                scope, stored.updated_at, pushed.updated_at
                            );
                            refused_by_newer = Some(stored);
                        }
                    }
                }
            }
        }

        // A refused push always gets the winning copy back, whatever the
        // client's last sync point says.
        let unsynced = match refused_by_newer {
            Some(stored) => Some(stored),
            None => state.store.get_newer_than(&key, since).await?,
        };
        let unsynced = unsynced.map(Into::into);
        match scope {
            Scope::User => data.unsynced_user_settings = unsynced,
            Scope::Global => data.unsynced_global_settings = unsynced,
        }
    }

    Ok(Json(SyncResponse {
        success: true,
        data: Some(data),
        message: None,
    }))
}

async fn get_settings(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<SettingsResponse>, ApiError> {
    let identity = state.identify(&headers)?;
    debug!("GET /api/settings for {}", identity.id);

    let user = state.store.get(&Scope::User.storage_key(&identity.id)).await?;
    let global = state
        .store
        .get(&Scope::Global.storage_key(&identity.id))
        .await?;

    Ok(Json(SettingsResponse {
        success: true,
        data: Some(SettingsData {
            user_settings: user.map(Into::into),
            global_settings: global.map(Into::into),
        }),
        message: None,
    }))
}

async fn put_user_settings(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Result<Json<PutSettingsBody>, JsonRejection>,
) -> Result<Json<PutSettingsResponse>, ApiError> {
    put_scope(&state, &headers, Scope::User, body).await
}

async fn put_global_settings(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Result<Json<PutSettingsBody>, JsonRejection>,
) -> Result<Json<PutSettingsResponse>, ApiError> {
    put_scope(&state, &headers, Scope::Global, body).await
}

async fn put_scope(
    state: &ApiState,
    headers: &HeaderMap,
    scope: Scope,
    body: Result<Json<PutSettingsBody>, JsonRejection>,
) -> Result<Json<PutSettingsResponse>, ApiError> {
    let identity = state.identify(headers)?;
    debug!("PUT /api/settings/{} for {}", scope, identity.id);

    if scope == Scope::Global && !identity.has_elevated_role() {
        warn!(
            "PUT /api/settings/global: forbidden for {} ({:?})",
            identity.id, identity.role
        );
        return Err(ApiError::Forbidden);
    }

    let Json(body) = body?;
    let settings = body
        .settings
        .ok_or_else(|| ApiError::BadRequest("Missing `settings` in request body".to_string()))?;
    let updated_at = body
        .updated_at
        .as_ref()
        .and_then(timestamp::coerce)
        .unwrap_or_else(|| state.clock.now());

    let doc = StoredDocument {
        id: scope.storage_key(&identity.id),
        settings,
        updated_at,
    };
    let accepted = state.store.upsert_if_newer(doc).await?.is_accepted();
    if !accepted {
        debug!("PUT /api/settings/{}: stored copy is newer", scope);
    }

    Ok(Json(PutSettingsResponse {
        success: true,
        data: Some(PutSettingsData {
            accepted,
            updated_at,
        }),
        message: None,
    }))
}
