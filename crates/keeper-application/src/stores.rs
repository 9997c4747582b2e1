//! Per-conversation snapshot store management.
//!
//! Stores load lazily from the persistence adapter on first touch and stay
//! in memory for the rest of the session; they remain authoritative even
//! when a mirrored write fails.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use keeper_core::error::Result;
use keeper_core::store::{keys, KvAdapter, SnapshotStore};
use keeper_infrastructure::dto::snapshots_from_value;

/// In-memory snapshot stores for all touched conversations.
pub struct ConversationStores {
    stores: RwLock<HashMap<String, SnapshotStore>>,
    adapter: Arc<dyn KvAdapter>,
    capacity: usize,
}

impl ConversationStores {
    /// Creates an empty registry backed by the given adapter.
    pub fn new(adapter: Arc<dyn KvAdapter>, capacity: usize) -> Self {
        Self {
            stores: RwLock::new(HashMap::new()),
            adapter,
            capacity,
        }
    }

    /// Runs `f` against the conversation's store, loading it from the
    /// adapter first if this conversation has not been touched yet.
    pub async fn with_store<R>(
        &self,
        conversation_id: &str,
        f: impl FnOnce(&mut SnapshotStore) -> R,
    ) -> Result<R> {
        self.ensure_loaded(conversation_id).await?;
        let mut stores = self.stores.write().await;
        let store = stores
            .entry(conversation_id.to_string())
            .or_insert_with(|| SnapshotStore::with_capacity(self.capacity));
        Ok(f(store))
    }

    async fn ensure_loaded(&self, conversation_id: &str) -> Result<()> {
        if self.stores.read().await.contains_key(conversation_id) {
            return Ok(());
        }
        let raw = self.adapter.get(&keys::snapshots(conversation_id)).await?;
        let snapshots = snapshots_from_value(conversation_id, raw);
        tracing::debug!(
            conversation_id,
            count = snapshots.len(),
            "Loaded persisted snapshots"
        );
        let store = SnapshotStore::from_snapshots(snapshots, self.capacity);
        self.stores
            .write()
            .await
            .entry(conversation_id.to_string())
            .or_insert(store);
        Ok(())
    }

    /// Drops a conversation's store from memory.
    pub async fn remove(&self, conversation_id: &str) {
        self.stores.write().await.remove(conversation_id);
    }

    /// Number of conversations with a loaded store.
    pub async fn conversation_count(&self) -> usize {
        self.stores.read().await.len()
    }

    /// Total snapshots held across all loaded stores.
    pub async fn total_snapshots(&self) -> usize {
        self.stores
            .read()
            .await
            .values()
            .map(SnapshotStore::len)
            .sum()
    }
}
