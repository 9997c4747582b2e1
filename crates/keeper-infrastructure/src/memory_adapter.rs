//! In-memory persistence adapter.
//!
//! Used by tests and by hosts that embed Keeper without durable storage.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use keeper_core::error::Result;
use keeper_core::store::KvAdapter;

/// Key/value adapter backed by an in-memory map.
#[derive(Debug, Default)]
pub struct MemoryKvAdapter {
    values: RwLock<BTreeMap<String, serde_json::Value>>,
}

impl MemoryKvAdapter {
    /// Creates an empty adapter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.values.read().await.len()
    }

    /// Returns true if nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.values.read().await.is_empty()
    }
}

#[async_trait]
impl KvAdapter for MemoryKvAdapter {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.write().await.remove(key);
        Ok(())
    }

    async fn get_all(&self) -> Result<BTreeMap<String, serde_json::Value>> {
        Ok(self.values.read().await.clone())
    }
}
