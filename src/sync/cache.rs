//! On-disk cache of the local settings state.
//!
//! Lets a client restart without losing unpushed edits or its last sync
//! point. Written atomically through a sibling temp file.

use std::path::{Path, PathBuf};

use super::state::SettingsState;
use crate::error::CacheError;

/// Read the cached state. A missing file is not an error.
pub async fn load(path: &Path) -> Result<Option<SettingsState>, CacheError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_str(&content)?))
}

/// Replace the cached state.
pub async fn save(path: &Path, state: &SettingsState) -> Result<(), CacheError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let json = serde_json::to_string_pretty(state)?;
    let tmp = temp_path(path);
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Remove the cache file, if any.
pub async fn remove(path: &Path) -> Result<(), CacheError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
