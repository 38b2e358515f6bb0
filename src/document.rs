use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

use crate::timestamp::{epoch, Timestamp};

/// Setting name → value. Opaque to the sync core and treated as one blob.
pub type Payload = Map<String, Value>;

/// Key of the singleton global settings row.
pub const GLOBAL_SETTINGS_ID: uuid::Uuid = uuid::Uuid::nil();

/// One of the two independent settings documents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// One document per authenticated identity.
    User,
    /// One document system-wide.
    Global,
}

impl Scope {
    pub const ALL: [Scope; 2] = [Scope::User, Scope::Global];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "user" => Some(Scope::User),
            "global" => Some(Scope::Global),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::User => "user",
            Scope::Global => "global",
        }
    }

    /// Store key for this scope's row, given the owning identity.
    pub fn storage_key(&self, user_id: &str) -> String {
        match self {
            Scope::User => format!("user:{}", user_id),
            Scope::Global => format!("global:{}", GLOBAL_SETTINGS_ID),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default payloads per scope.
///
/// The application owns the settings schema. Remote documents are merged
/// onto these so fields missing from an older remote copy keep a value.
#[derive(Clone, Debug, PartialEq)]
pub struct Defaults {
    pub user: Payload,
    pub global: Payload,
}

impl Defaults {
    pub fn for_scope(&self, scope: Scope) -> &Payload {
        match scope {
            Scope::User => &self.user,
            Scope::Global => &self.global,
        }
    }

    pub fn empty() -> Self {
        Self {
            user: Payload::new(),
            global: Payload::new(),
        }
    }
}

impl Default for Defaults {
    fn default() -> Self {
        let user = json!({
            "fontFamily": "Geist",
            "favoriteThemes": [],
            "themeSorting": { "sortedByName": false, "reverseSort": false },
            "funboxModes": []
        });
        let global = json!({
            "allowRegistration": false,
            "allowFileUpload": false,
            "ollamaUrls": ["http://localhost:11434"],
            "lmStudioEnabled": false
        });
        Self {
            user: into_payload(user),
            global: into_payload(global),
        }
    }
}

fn into_payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}

/// Shallow merge: every top-level field of `patch` overwrites `base`.
pub fn merge_shallow(base: &mut Payload, patch: &Payload) {
    for (key, value) in patch {
        base.insert(key.clone(), value.clone());
    }
}

/// The locally held copy of one scope's settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsDocument {
    pub scope: Scope,
    pub payload: Payload,
    pub updated_at: Timestamp,
    /// True iff the server is known to hold this payload (or something newer).
    pub synced: bool,
    /// Bumped on every local mutation. Never leaves the process.
    #[serde(default)]
    pub revision: u64,
}

impl SettingsDocument {
    /// A pristine document: defaults, epoch timestamp, nothing to push.
    pub fn new(scope: Scope, defaults: &Defaults) -> Self {
        Self {
            scope,
            payload: defaults.for_scope(scope).clone(),
            updated_at: epoch(),
            synced: true,
            revision: 0,
        }
    }

    pub fn is_dirty(&self) -> bool {
        !self.synced
    }
}

/// A row in the server's settings store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredDocument {
    pub id: String,
    pub settings: Payload,
    pub updated_at: DateTime<Utc>,
}
