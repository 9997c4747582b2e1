//! JSON-file persistence adapter.
//!
//! Stores one `<key>.json` file per key in a flat directory:
//!
//! ```text
//! base_dir/
//! ├── chat_<conversation-id>.json
//! └── snapshots_<conversation-id>.json
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use keeper_core::error::{KeeperError, Result};
use keeper_core::store::KvAdapter;

/// Key/value adapter persisting each key as a JSON file.
pub struct JsonFileKvAdapter {
    base_dir: PathBuf,
}

impl JsonFileKvAdapter {
    /// Creates a new adapter rooted at `base_dir`.
    ///
    /// The directory is created if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir).map_err(|e| {
            KeeperError::persistence(format!(
                "failed to create storage directory {:?}: {}",
                base_dir, e
            ))
        })?;
        Ok(Self { base_dir })
    }

    /// Creates an adapter at the default location (`~/.local/share/keeper`).
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be determined or
    /// created.
    pub fn default_location() -> Result<Self> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| KeeperError::config("failed to determine data directory"))?;
        Self::new(data_dir.join("keeper"))
    }

    /// The directory files are stored in.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn file_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{key}.json"))
    }
}

#[async_trait]
impl KvAdapter for JsonFileKvAdapter {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let path = self.file_path(key);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(KeeperError::persistence(format!(
                    "failed to read {:?}: {}",
                    path, e
                )));
            }
        };
        let value = serde_json::from_str(&content)?;
        Ok(Some(value))
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let path = self.file_path(key);
        let json = serde_json::to_string_pretty(&value)?;
        fs::write(&path, json)
            .await
            .map_err(|e| KeeperError::persistence(format!("failed to write {:?}: {}", path, e)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.file_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(KeeperError::persistence(format!(
                "failed to delete {:?}: {}",
                path, e
            ))),
        }
    }

    async fn get_all(&self) -> Result<BTreeMap<String, serde_json::Value>> {
        let mut values = BTreeMap::new();
        let mut entries = fs::read_dir(&self.base_dir).await.map_err(|e| {
            KeeperError::persistence(format!("failed to read {:?}: {}", self.base_dir, e))
        })?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| KeeperError::persistence(format!("failed to read directory entry: {e}")))?
        {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match fs::read_to_string(&path).await {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(value) => {
                        values.insert(key.to_string(), value);
                    }
                    Err(e) => {
                        tracing::warn!(path = ?path, error = %e, "Skipping unparseable file");
                    }
                },
                Err(e) => {
                    tracing::warn!(path = ?path, error = %e, "Skipping unreadable file");
                }
            }
        }
        Ok(values)
    }
}
