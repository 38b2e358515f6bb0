mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::{test_router, ts, ADMIN_TOKEN, USER_TOKEN};
use http_body_util::BodyExt;
use prefsync::document::StoredDocument;
use prefsync::store::{MemoryStore, SettingsStore};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::util::ServiceExt;

// Helper to get response body as JSON
async fn body_to_json(body: Body) -> Value {
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get_settings(token: &str) -> Request<Body> {
    Request::builder()
        .uri("/api/settings")
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let app = test_router(Arc::new(MemoryStore::new()));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"OK");
}

#[tokio::test]
async fn test_sync_requires_token() {
    let app = test_router(Arc::new(MemoryStore::new()));

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/sync",
            None,
            json!({"lastSyncTime": null, "kind": "login"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_to_json(response.into_body()).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Unauthorized");

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/sync",
            Some("not-a-token"),
            json!({"lastSyncTime": null, "kind": "login"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_round_returns_everything() {
    let store = Arc::new(MemoryStore::new());
    store
        .upsert_if_newer(StoredDocument {
            id: "user:alice".to_string(),
            settings: serde_json::from_value(json!({"theme": "dark"})).unwrap(),
            updated_at: ts(0),
        })
        .await
        .unwrap();
    let app = test_router(store);

    // A late lastSyncTime is ignored by login rounds.
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/sync",
            Some(USER_TOKEN),
            json!({"lastSyncTime": ts(100), "type": "login"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await;
    assert_eq!(body["success"], true);
    assert_eq!(
        body["data"]["unsyncedUserSettings"]["settings"]["theme"],
        "dark"
    );
    assert!(body["data"]["unsyncedGlobalSettings"].is_null());
}

#[tokio::test]
async fn test_full_round_stores_push_and_filters_by_last_sync() {
    let store = Arc::new(MemoryStore::new());
    let app = test_router(store.clone());

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/sync",
            Some(USER_TOKEN),
            json!({
                "lastSyncTime": ts(0),
                "kind": "full",
                "userSettings": {"settings": {"theme": "light"}, "updatedAt": ts(10)}
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stored = store.get("user:alice").await.unwrap().unwrap();
    assert_eq!(stored.settings["theme"], "light");
    assert_eq!(stored.updated_at, ts(10));

    // Nothing newer than the client's last sync point.
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/sync",
            Some(USER_TOKEN),
            json!({"lastSyncTime": ts(20), "kind": "full"}),
        ))
        .await
        .unwrap();
    let body = body_to_json(response.into_body()).await;
    assert!(body["data"]["unsyncedUserSettings"].is_null());
}

#[tokio::test]
async fn test_stale_push_gets_newer_copy_back() {
    let store = Arc::new(MemoryStore::new());
    store
        .upsert_if_newer(StoredDocument {
            id: "user:alice".to_string(),
            settings: serde_json::from_value(json!({"theme": "from-a"})).unwrap(),
            updated_at: ts(10),
        })
        .await
        .unwrap();
    let app = test_router(store.clone());

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/sync",
            Some(USER_TOKEN),
            json!({
                "lastSyncTime": ts(50),
                "kind": "full",
                "userSettings": {"settings": {"theme": "from-b"}, "updatedAt": ts(0)}
            }),
        ))
        .await
        .unwrap();

    let body = body_to_json(response.into_body()).await;
    assert_eq!(
        body["data"]["unsyncedUserSettings"]["settings"]["theme"],
        "from-a"
    );
    let stored = store.get("user:alice").await.unwrap().unwrap();
    assert_eq!(stored.updated_at, ts(10));
}

#[tokio::test]
async fn test_sync_rejects_global_push_from_regular_user() {
    let store = Arc::new(MemoryStore::new());
    let app = test_router(store.clone());

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/sync",
            Some(USER_TOKEN),
            json!({
                "lastSyncTime": null,
                "kind": "full",
                "userSettings": {"settings": {"theme": "x"}, "updatedAt": ts(1)},
                "globalSettings": {"settings": {"allowRegistration": true}, "updatedAt": ts(1)}
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await;
    assert_eq!(body["data"]["rejected"], json!(["global"]));
    assert!(store.get("user:alice").await.unwrap().is_some());
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_put_global_requires_elevated_role() {
    let store = Arc::new(MemoryStore::new());
    let app = test_router(store.clone());
    let body = json!({"settings": {"allowRegistration": true}, "updatedAt": ts(5)});

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            "/api/settings/global",
            Some(USER_TOKEN),
            body.clone(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(store.is_empty().await);

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            "/api/settings/global",
            Some(ADMIN_TOKEN),
            body,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await;
    assert_eq!(body["data"]["accepted"], true);

    // The global document is shared: regular users read it too.
    let response = app.oneshot(get_settings(USER_TOKEN)).await.unwrap();
    let body = body_to_json(response.into_body()).await;
    assert_eq!(
        body["data"]["globalSettings"]["settings"]["allowRegistration"],
        true
    );
    assert!(body["data"]["userSettings"].is_null());
}

#[tokio::test]
async fn test_put_without_settings_is_bad_request() {
    let app = test_router(Arc::new(MemoryStore::new()));

    let response = app
        .oneshot(json_request(
            "PUT",
            "/api/settings/user",
            Some(USER_TOKEN),
            json!({"updatedAt": ts(1)}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_to_json(response.into_body()).await;
    assert_eq!(body["message"], "Missing `settings` in request body");
}

#[tokio::test]
async fn test_put_never_moves_backwards() {
    let store = Arc::new(MemoryStore::new());
    let app = test_router(store.clone());

    let put = |theme: &str, at| {
        json_request(
            "PUT",
            "/api/settings/user",
            Some(USER_TOKEN),
            json!({"settings": {"theme": theme}, "updatedAt": at}),
        )
    };

    let response = app.clone().oneshot(put("second", ts(20))).await.unwrap();
    assert_eq!(body_to_json(response.into_body()).await["data"]["accepted"], true);

    let response = app.clone().oneshot(put("first", ts(10))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_to_json(response.into_body()).await["data"]["accepted"], false);

    let response = app.clone().oneshot(put("third", ts(30))).await.unwrap();
    assert_eq!(body_to_json(response.into_body()).await["data"]["accepted"], true);

    let stored = store.get("user:alice").await.unwrap().unwrap();
    assert_eq!(stored.settings["theme"], "third");
    assert_eq!(stored.updated_at, ts(30));
}

#[tokio::test]
async fn test_put_accepts_epoch_millis() {
    let store = Arc::new(MemoryStore::new());
    let app = test_router(store.clone());

    let millis = ts(0).timestamp_millis();
    let response = app
        .oneshot(json_request(
            "PUT",
            "/api/settings/user",
            Some(USER_TOKEN),
            json!({"settings": {"theme": "x"}, "updatedAt": millis}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let stored = store.get("user:alice").await.unwrap().unwrap();
    assert_eq!(stored.updated_at, ts(0));
}

#[tokio::test]
async fn test_malformed_sync_body_is_json_bad_request() {
    let app = test_router(Arc::new(MemoryStore::new()));

    // `kind` is required.
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/sync",
            Some(USER_TOKEN),
            json!({"lastSyncTime": null}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_to_json(response.into_body()).await;
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("kind"));
}

#[tokio::test]
async fn test_unparseable_put_body_is_json_bad_request() {
    let app = test_router(Arc::new(MemoryStore::new()));

    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/api/settings/user")
                .header("content-type", "application/json")
                .header("authorization", format!("Bearer {}", USER_TOKEN))
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_to_json(response.into_body()).await;
    assert_eq!(body["success"], false);
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn test_bad_body_without_token_is_still_unauthorized() {
    let app = test_router(Arc::new(MemoryStore::new()));

    let response = app
        .oneshot(json_request("POST", "/api/sync", None, json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
