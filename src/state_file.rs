//! JSON file checkpoint backend.
//!
//! The state map is stored as a pretty-printed JSON object. Writes go to a
//! sibling `.tmp` file that is then renamed over the target, so a crash
//! mid-write leaves either the old or the new state on disk.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

use movies_etl_core::checkpoint::{StateMap, StateStorage};

pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StateStorage for JsonFileStorage {
    fn backend(&self) -> &str {
        "file"
    }

    async fn save_state(&self, state: &StateMap) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.with_context(|| {
                    format!("Failed to create state directory: {}", parent.display())
                })?;
            }
        }

        let body = serde_json::to_string_pretty(state)?;
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("Failed to write state file: {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace state file: {}", self.path.display()))?;
        Ok(())
    }

    async fn retrieve_state(&self) -> Result<StateMap> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Err(e) = self.save_state(&StateMap::new()).await {
                    tracing::warn!(path = %self.path.display(), error = %e, "failed to initialize state file");
                }
                return Ok(StateMap::new());
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read state file: {}", self.path.display())
                })
            }
        };

        match serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&raw) {
            Ok(map) => Ok(map
                .into_iter()
                .filter_map(|(k, v)| match v {
                    serde_json::Value::String(s) => Some((k, s)),
                    serde_json::Value::Null => None,
                    other => Some((k, other.to_string())),
                })
                .collect()),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "state file is not a JSON object");
                Ok(StateMap::new())
            }
        }
    }
}
