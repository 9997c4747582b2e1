//! Snapshot store and persistence adapter interface.
//!
//! The [`SnapshotStore`] is the in-memory, per-conversation ordered list of
//! snapshots; it stays authoritative for the session even when a mirrored
//! write through the [`KvAdapter`] fails.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::snapshot::Snapshot;

/// Default maximum number of snapshots retained per conversation.
pub const DEFAULT_SNAPSHOT_CAPACITY: usize = 50;

/// Keys used against the persistence adapter.
pub mod keys {
    /// Whole-conversation live state.
    pub fn chat_state(conversation_id: &str) -> String {
        format!("chat_{conversation_id}")
    }

    /// Ordered snapshot array for a conversation.
    pub fn snapshots(conversation_id: &str) -> String {
        format!("snapshots_{conversation_id}")
    }
}

/// An abstract key/value persistence adapter scoped to conversations.
///
/// This trait defines the contract for persisting conversation state and
/// snapshot arrays, decoupling the engine from the specific storage mechanism
/// (in-memory map, JSON files, a hosting application's store). Reads of
/// absent keys yield `Ok(None)`, never an error.
#[async_trait]
pub trait KvAdapter: Send + Sync {
    /// Reads the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()>;

    /// Removes the value stored under `key`, if any.
    async fn delete(&self, key: &str) -> Result<()>;

    /// All stored key/value pairs.
    async fn get_all(&self) -> Result<BTreeMap<String, serde_json::Value>>;
}

/// In-memory ordered list of snapshots for one conversation.
///
/// Invariants: ascending by `floor_index`, at most one snapshot per floor,
/// at most `capacity` entries (oldest floors evicted first).
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    snapshots: Vec<Snapshot>,
    capacity: usize,
}

impl SnapshotStore {
    /// Creates an empty store with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SNAPSHOT_CAPACITY)
    }

    /// Creates an empty store with a custom capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            snapshots: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    /// Rebuilds a store from persisted snapshots, restoring the ordering and
    /// capacity invariants.
    pub fn from_snapshots(snapshots: Vec<Snapshot>, capacity: usize) -> Self {
        let mut store = Self::with_capacity(capacity);
        for snapshot in snapshots {
            store.insert(snapshot);
        }
        store
    }

    /// Inserts a snapshot, replacing any existing snapshot at the same floor
    /// (last write wins per floor), then prunes to capacity.
    pub fn insert(&mut self, snapshot: Snapshot) {
        self.snapshots
            .retain(|s| s.floor_index != snapshot.floor_index);
        self.snapshots.push(snapshot);
        self.snapshots.sort_by_key(|s| s.floor_index);
        if self.snapshots.len() > self.capacity {
            let excess = self.snapshots.len() - self.capacity;
            self.snapshots.drain(..excess);
        }
    }

    /// The snapshot captured exactly at `floor`, if any.
    pub fn exact(&self, floor: u32) -> Option<&Snapshot> {
        self.snapshots.iter().find(|s| s.floor_index == floor)
    }

    /// Fallback search: the snapshot with the greatest floor at or before
    /// `floor`, skipping excluded snapshot ids.
    pub fn at_or_before(&self, floor: u32, exclude: &[String]) -> Option<&Snapshot> {
        self.snapshots
            .iter()
            .rev()
            .find(|s| s.floor_index <= floor && !exclude.iter().any(|id| id == &s.id))
    }

    /// Last-resort fallback: the oldest available snapshot, skipping
    /// excluded snapshot ids.
    pub fn oldest(&self, exclude: &[String]) -> Option<&Snapshot> {
        self.snapshots
            .iter()
            .find(|s| !exclude.iter().any(|id| id == &s.id))
    }

    /// Snapshots in ascending floor order.
    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    /// Number of retained snapshots.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Returns true if no snapshots are retained.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::PanelState;

    fn snapshot_at(floor: u32) -> Snapshot {
        Snapshot::capture("chat-1", floor, PanelState::default(), floor as i64)
    }

    #[test]
    fn test_insert_keeps_ascending_order() {
        let mut store = SnapshotStore::new();
        store.insert(snapshot_at(7));
        store.insert(snapshot_at(0));
        store.insert(snapshot_at(3));
        let floors: Vec<u32> = store.snapshots().iter().map(|s| s.floor_index).collect();
        assert_eq!(floors, vec![0, 3, 7]);
    }

    #[test]
    fn test_insert_replaces_same_floor() {
        let mut store = SnapshotStore::new();
        let first = snapshot_at(3);
        let first_id = first.id.clone();
        store.insert(first);
        store.insert(snapshot_at(3));
        assert_eq!(store.len(), 1);
        assert_ne!(store.exact(3).unwrap().id, first_id);
    }

    #[test]
    fn test_capacity_evicts_oldest_floors() {
        let mut store = SnapshotStore::with_capacity(50);
        for floor in 0..60 {
            store.insert(snapshot_at(floor));
        }
        assert_eq!(store.len(), 50);
        // Exactly the 50 most recent floors remain.
        assert_eq!(store.snapshots()[0].floor_index, 10);
        assert_eq!(store.snapshots()[49].floor_index, 59);
    }

    #[test]
    fn test_fallback_at_or_before() {
        let mut store = SnapshotStore::new();
        for floor in [0, 3, 7] {
            store.insert(snapshot_at(floor));
        }
        assert_eq!(store.at_or_before(5, &[]).unwrap().floor_index, 3);
        assert_eq!(store.at_or_before(7, &[]).unwrap().floor_index, 7);
        assert!(store.at_or_before(5, &[store.exact(3).unwrap().id.clone()])
            .map(|s| s.floor_index == 0)
            .unwrap_or(false));
    }

    #[test]
    fn test_oldest_as_last_resort() {
        let mut store = SnapshotStore::new();
        for floor in [4, 9] {
            store.insert(snapshot_at(floor));
        }
        // Nothing at or before floor 2; the oldest snapshot is the fallback.
        assert!(store.at_or_before(2, &[]).is_none());
        assert_eq!(store.oldest(&[]).unwrap().floor_index, 4);
    }

    #[test]
    fn test_from_snapshots_restores_invariants() {
        let snapshots = vec![snapshot_at(9), snapshot_at(2), snapshot_at(5)];
        let store = SnapshotStore::from_snapshots(snapshots, 2);
        assert_eq!(store.len(), 2);
        assert_eq!(store.snapshots()[0].floor_index, 5);
    }
}
