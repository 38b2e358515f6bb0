//! Wire types for the settings HTTP API.
//!
//! Every response carries `success`; failures add a human-readable
//! `message` instead of `data`.

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{Payload, Scope, StoredDocument};
use crate::timestamp::{self, Timestamp};

/// What a sync round is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncKind {
    /// Hydration round: push nothing, accept whatever the server holds.
    Login,
    /// Regular round: push dirty scopes, fetch newer ones.
    Full,
}

/// A local document being pushed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushedDocument {
    pub settings: Payload,
    pub updated_at: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub last_sync_time: Option<Timestamp>,
    #[serde(alias = "type")]
    pub kind: SyncKind,
    #[serde(default)]
    pub user_settings: Option<PushedDocument>,
    #[serde(default)]
    pub global_settings: Option<PushedDocument>,
}

impl SyncRequest {
    pub fn pushed(&self, scope: Scope) -> Option<&PushedDocument> {
        match scope {
            Scope::User => self.user_settings.as_ref(),
            Scope::Global => self.global_settings.as_ref(),
        }
    }

    /// Scopes carried by this request.
    pub fn pushed_scopes(&self) -> Vec<Scope> {
        Scope::ALL
            .into_iter()
            .filter(|scope| self.pushed(*scope).is_some())
            .collect()
    }
}

/// A stored document as it travels back to a client.
///
/// The timestamp stays loosely typed on the way in: a client applies a
/// document whose timestamp it cannot read, stamping it with its own clock.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDocument {
    #[serde(default)]
    pub settings: Payload,
    #[serde(default)]
    pub updated_at: Option<Value>,
}

impl RemoteDocument {
    pub fn timestamp(&self) -> Option<Timestamp> {
        self.updated_at.as_ref().and_then(timestamp::coerce)
    }
}

impl From<StoredDocument> for RemoteDocument {
    fn from(doc: StoredDocument) -> Self {
        Self {
            settings: doc.settings,
            updated_at: Some(Value::String(
                doc.updated_at.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            )),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncData {
    /// Server copy, when newer than the client's last sync point.
    #[serde(default)]
    pub unsynced_user_settings: Option<RemoteDocument>,
    #[serde(default)]
    pub unsynced_global_settings: Option<RemoteDocument>,
    /// Pushed scopes the caller was not allowed to write.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<Scope>,
}

impl SyncData {
    pub fn unsynced(&self, scope: Scope) -> Option<&RemoteDocument> {
        match scope {
            Scope::User => self.unsynced_user_settings.as_ref(),
            Scope::Global => self.unsynced_global_settings.as_ref(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<SyncData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsData {
    #[serde(default)]
    pub user_settings: Option<RemoteDocument>,
    #[serde(default)]
    pub global_settings: Option<RemoteDocument>,
}

impl SettingsData {
    pub fn for_scope(&self, scope: Scope) -> Option<&RemoteDocument> {
        match scope {
            Scope::User => self.user_settings.as_ref(),
            Scope::Global => self.global_settings.as_ref(),
        }
    }
}

/// Body of `GET /api/settings`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SettingsResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<SettingsData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Body of `PUT /api/settings/{user,global}`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutSettingsBody {
    #[serde(default)]
    pub settings: Option<Payload>,
    #[serde(default)]
    pub updated_at: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutSettingsData {
    /// False when the stored copy was newer and kept.
    pub accepted: bool,
    pub updated_at: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PutSettingsResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<PutSettingsData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_accepts_type_alias() {
        let req: SyncRequest = serde_json::from_value(json!({
            "lastSyncTime": null,
            "type": "login",
            "userSettings": null,
            "globalSettings": null
        }))
        .unwrap();
        assert_eq!(req.kind, SyncKind::Login);
        assert!(req.pushed_scopes().is_empty());
    }

    #[test]
    fn test_request_wire_shape() {
        let req = SyncRequest {
            last_sync_time: None,
            kind: SyncKind::Full,
            user_settings: Some(PushedDocument {
                settings: Payload::new(),
                updated_at: timestamp::epoch(),
            }),
            global_settings: None,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["kind"], "full");
        assert_eq!(value["userSettings"]["settings"], json!({}));
        assert!(value["globalSettings"].is_null());
        assert_eq!(req.pushed_scopes(), vec![Scope::User]);
    }

    #[test]
    fn test_remote_document_tolerates_bad_timestamp() {
        let doc: RemoteDocument =
            serde_json::from_value(json!({"settings": {"theme": "x"}, "updatedAt": "soon"}))
                .unwrap();
        assert!(doc.timestamp().is_none());
        assert_eq!(doc.settings["theme"], "x");
    }

    #[test]
    fn test_remote_document_keeps_sub_second_precision() {
        let at = timestamp::epoch() + chrono::Duration::nanoseconds(1_500_000_123);
        let remote = RemoteDocument::from(StoredDocument {
            id: "user:a".to_string(),
            settings: Payload::new(),
            updated_at: at,
        });
        assert_eq!(remote.timestamp(), Some(at));
    }

    #[test]
    fn test_sync_response_without_data() {
        let resp: SyncResponse =
            serde_json::from_value(json!({"success": false, "message": "Sync failed"})).unwrap();
        assert!(!resp.success);
        assert!(resp.data.is_none());
    }
}
