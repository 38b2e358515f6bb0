use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::identity::Identity;

/// Server-side token table: bearer token → identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub tokens: HashMap<String, Identity>,
}

impl AuthConfig {
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }
}

/// Client tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_server")]
    pub server: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Periodic background sync; off when unset.
    #[serde(default)]
    pub sync_interval_secs: Option<u64>,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            token: None,
            debounce_ms: default_debounce_ms(),
            sync_interval_secs: None,
            request_timeout_secs: default_timeout_secs(),
            cache_path: None,
        }
    }
}

fn default_server() -> String {
    "http://localhost:3000".to_string()
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_timeout_secs() -> u64 {
    10
}

impl ClientConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn sync_interval(&self) -> Option<Duration> {
        self.sync_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Where the local cache lives unless overridden.
    pub fn default_cache_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("prefsync")
            .join("cache.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Role;

    #[test]
    fn test_parse_auth_config() {
        let json = r#"{
            "tokens": {
                "secret-a": { "id": "alice", "role": "admin" },
                "secret-b": { "id": "bob" }
            }
        }"#;
        let config: AuthConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.tokens.len(), 2);
        assert_eq!(config.tokens["secret-a"].role, Role::Admin);
        assert_eq!(config.tokens["secret-b"].role, Role::User);
    }

    #[test]
    fn test_client_config_defaults() {
        let config: ClientConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.server, "http://localhost:3000");
        assert_eq!(config.debounce(), Duration::from_millis(500));
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert!(config.sync_interval().is_none());
    }

    #[test]
    fn test_zero_interval_disables_periodic_sync() {
        let config = ClientConfig {
            sync_interval_secs: Some(0),
            ..Default::default()
        };
        assert!(config.sync_interval().is_none());
    }
}
