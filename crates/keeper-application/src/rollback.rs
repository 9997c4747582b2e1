//! Rollback resolution.
//!
//! Given a target conversation position, finds the best available snapshot
//! and drives restoration. Deletion and regeneration can invalidate an
//! arbitrary floor, and callers cannot know which historical floor is
//! still backed by a snapshot, so the resolver searches instead of
//! assuming adjacency: exact match, then the closest earlier floor, then
//! the oldest snapshot as a last resort.
//!
//! When nothing usable exists the resolver leaves the current state
//! untouched and reports success. "Nothing to roll back to" is never
//! treated as "clear everything".

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use keeper_core::error::Result;
use keeper_core::events::{EventBus, TrackerEvent};
use keeper_core::scheduler::Clock;
use keeper_core::snapshot::Snapshot;
use keeper_core::store::SnapshotStore;

use crate::capture::{CaptureOptions, SnapshotCaptureService};
use crate::config::TrackerConfig;
use crate::restore::StateRestorer;
use crate::status::{report_failure, ErrorCounter};
use crate::stores::ConversationStores;

/// Resolves rollback targets to snapshots and drives restoration.
pub struct RollbackResolver {
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    config: TrackerConfig,
    stores: Arc<ConversationStores>,
    restorer: StateRestorer,
    capture: Arc<SnapshotCaptureService>,
    errors: Arc<ErrorCounter>,
    /// Current conversation position after the last successful restore.
    current_floors: RwLock<HashMap<String, u32>>,
}

impl RollbackResolver {
    /// Creates a new resolver.
    pub fn new(
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        stores: Arc<ConversationStores>,
        restorer: StateRestorer,
        capture: Arc<SnapshotCaptureService>,
        errors: Arc<ErrorCounter>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            bus,
            clock,
            config,
            stores,
            restorer,
            capture,
            errors,
            current_floors: RwLock::new(HashMap::new()),
        }
    }

    /// Rolls the conversation's panel state back to `target_floor`.
    ///
    /// Returns `Ok(true)` both when a snapshot was restored and when the
    /// protective no-op path ran; a persistence failure while writing the
    /// restored state is surfaced as an error.
    pub async fn rollback_to_floor(&self, conversation_id: &str, target_floor: u32) -> Result<bool> {
        let mut excluded: Vec<String> = Vec::new();
        let mut candidate: Option<Snapshot> = None;

        // One validation retry: the first failed candidate is excluded and
        // the fallback search runs again.
        for attempt in 0..2 {
            let found = self
                .stores
                .with_store(conversation_id, |store| {
                    select_candidate(store, target_floor, &excluded)
                })
                .await?;

            let Some(snapshot) = found else {
                break;
            };

            match snapshot.validate() {
                Ok(()) => {
                    if snapshot.floor_index == target_floor {
                        debug!(conversation_id, target_floor, "Exact snapshot match");
                    } else {
                        debug!(
                            conversation_id,
                            target_floor,
                            actual_floor = snapshot.floor_index,
                            "Fallback snapshot selected"
                        );
                    }
                    candidate = Some(snapshot);
                    break;
                }
                Err(e) => {
                    warn!(
                        conversation_id,
                        snapshot_id = %snapshot.id,
                        attempt,
                        error = %e,
                        "Snapshot candidate failed validation"
                    );
                    report_failure(
                        &self.bus,
                        &self.errors,
                        &self.clock,
                        format!(
                            "rollback: snapshot {} for {conversation_id} failed validation: {e}",
                            snapshot.id
                        ),
                    )
                    .await;
                    excluded.push(snapshot.id);
                }
            }
        }

        let Some(snapshot) = candidate else {
            return self.protective_noop(conversation_id, target_floor).await;
        };

        if let Err(e) = self.restorer.restore(conversation_id, &snapshot).await {
            report_failure(
                &self.bus,
                &self.errors,
                &self.clock,
                format!("rollback: failed to restore {conversation_id}: {e}"),
            )
            .await;
            return Err(e);
        }

        self.current_floors
            .write()
            .await
            .insert(conversation_id.to_string(), snapshot.floor_index);

        let event = TrackerEvent::RollbackCompleted {
            conversation_id: conversation_id.to_string(),
            target_floor,
            actual_floor: snapshot.floor_index,
            snapshot_id: Some(snapshot.id.clone()),
            timestamp: self.clock.now_ms(),
        };
        if let Err(e) = self.bus.publish(event).await {
            warn!(error = %e, "Failed to publish rollback event");
        }

        info!(
            conversation_id,
            target_floor,
            actual_floor = snapshot.floor_index,
            snapshot_id = %snapshot.id,
            "Rollback completed"
        );
        Ok(true)
    }

    /// No usable snapshot: leave the current state untouched and report
    /// success, optionally recording a defensive snapshot of the current
    /// state at the target floor.
    async fn protective_noop(&self, conversation_id: &str, target_floor: u32) -> Result<bool> {
        warn!(
            conversation_id,
            target_floor, "No usable snapshot; leaving current state untouched"
        );
        if self.config.defensive_snapshots {
            if let Err(e) = self
                .capture
                .create_snapshot(
                    conversation_id,
                    target_floor,
                    &CaptureOptions::forced("defensive"),
                )
                .await
            {
                warn!(error = %e, "Defensive snapshot failed");
            }
        }
        Ok(true)
    }

    /// The conversation's position after its last successful restore.
    pub async fn current_floor(&self, conversation_id: &str) -> Option<u32> {
        self.current_floors.read().await.get(conversation_id).copied()
    }

    /// Clears floor tracking for a conversation (conversation switch).
    pub async fn clear_tracking(&self, conversation_id: &str) {
        self.current_floors.write().await.remove(conversation_id);
    }
}

fn select_candidate(
    store: &mut SnapshotStore,
    target_floor: u32,
    excluded: &[String],
) -> Option<Snapshot> {
    if let Some(snapshot) = store.exact(target_floor) {
        if !excluded.contains(&snapshot.id) {
            return Some(snapshot.clone());
        }
    }
    if let Some(snapshot) = store.at_or_before(target_floor, excluded) {
        return Some(snapshot.clone());
    }
    store.oldest(excluded).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_core::panel::{FieldValue, Panel, PanelState, Record};
    use keeper_core::store::{keys, KvAdapter};
    use keeper_infrastructure::dto::{normalize_chat_payload, snapshots_to_value};
    use keeper_infrastructure::{BroadcastEventBus, ManualClock, ManualScheduler, MemoryKvAdapter};

    struct Fixture {
        resolver: RollbackResolver,
        adapter: Arc<MemoryKvAdapter>,
        bus: Arc<BroadcastEventBus>,
        stores: Arc<ConversationStores>,
    }

    fn fixture() -> Fixture {
        let adapter = Arc::new(MemoryKvAdapter::new());
        let bus = Arc::new(BroadcastEventBus::new());
        let clock = ManualClock::new(1_000);
        let scheduler = Arc::new(ManualScheduler::new(clock.clone()));
        let errors = Arc::new(ErrorCounter::default());
        let stores = Arc::new(ConversationStores::new(adapter.clone(), 50));
        let capture = Arc::new(SnapshotCaptureService::new(
            adapter.clone(),
            bus.clone(),
            scheduler,
            Arc::new(clock.clone()),
            stores.clone(),
            errors.clone(),
            TrackerConfig::default(),
        ));
        let restorer = StateRestorer::new(adapter.clone(), Arc::new(clock.clone()));
        let resolver = RollbackResolver::new(
            bus.clone(),
            Arc::new(clock),
            stores.clone(),
            restorer,
            capture,
            errors,
            TrackerConfig::default(),
        );
        Fixture {
            resolver,
            adapter,
            bus,
            stores,
        }
    }

    fn state_at(floor: u32) -> PanelState {
        let mut record = Record::new();
        record.insert("floor".into(), FieldValue::text(floor.to_string()));
        let mut state = PanelState::default();
        state.panels.insert("stats".into(), Panel::Record(record));
        state
    }

    async fn seed_snapshots(f: &Fixture, floors: &[u32]) {
        let snapshots: Vec<Snapshot> = floors
            .iter()
            .map(|&floor| Snapshot::capture("chat-1", floor, state_at(floor), floor as i64))
            .collect();
        f.adapter
            .set(
                &keys::snapshots("chat-1"),
                snapshots_to_value(&snapshots).unwrap(),
            )
            .await
            .unwrap();
    }

    async fn restored_floor(f: &Fixture) -> Option<String> {
        let raw = f.adapter.get(&keys::chat_state("chat-1")).await.unwrap();
        let state = normalize_chat_payload(raw).into_state()?;
        match state.panels.get("stats")? {
            Panel::Record(record) => record.get("floor")?.as_text(),
            Panel::Table(_) => None,
        }
    }

    #[tokio::test]
    async fn test_exact_match_restores() {
        let f = fixture();
        seed_snapshots(&f, &[0, 2, 4]).await;

        assert!(f.resolver.rollback_to_floor("chat-1", 2).await.unwrap());
        assert_eq!(restored_floor(&f).await.as_deref(), Some("2"));
        assert_eq!(f.resolver.current_floor("chat-1").await, Some(2));
    }

    #[tokio::test]
    async fn test_fallback_selects_greatest_at_or_before() {
        let f = fixture();
        seed_snapshots(&f, &[0, 3, 7]).await;

        assert!(f.resolver.rollback_to_floor("chat-1", 5).await.unwrap());
        assert_eq!(restored_floor(&f).await.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_fallback_uses_oldest_as_last_resort() {
        let f = fixture();
        seed_snapshots(&f, &[6, 9]).await;

        assert!(f.resolver.rollback_to_floor("chat-1", 2).await.unwrap());
        assert_eq!(restored_floor(&f).await.as_deref(), Some("6"));
    }

    #[tokio::test]
    async fn test_empty_store_is_a_protective_noop() {
        let f = fixture();
        f.adapter
            .set(
                &keys::chat_state("chat-1"),
                serde_json::json!({"stats": {"mood": "calm"}}),
            )
            .await
            .unwrap();

        assert!(f.resolver.rollback_to_floor("chat-1", 3).await.unwrap());

        // Current state untouched, not cleared.
        let raw = f.adapter.get(&keys::chat_state("chat-1")).await.unwrap();
        let state = normalize_chat_payload(raw).into_state().unwrap();
        assert!(state.panels.contains_key("stats"));

        // A defensive snapshot of the current state was recorded.
        let count = f.stores.with_store("chat-1", |s| s.len()).await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_corrupt_candidate_falls_back_once() {
        let f = fixture();
        let good = Snapshot::capture("chat-1", 1, state_at(1), 10);
        let mut bad = Snapshot::capture("chat-1", 4, state_at(4), 20);
        // Tampered data no longer matches the stored fingerprint.
        bad.data.panels.insert("extra".into(), Panel::empty());
        bad.metadata.panel_count = bad.data.panels.len();

        f.adapter
            .set(
                &keys::snapshots("chat-1"),
                snapshots_to_value(&[good, bad]).unwrap(),
            )
            .await
            .unwrap();

        assert!(f.resolver.rollback_to_floor("chat-1", 4).await.unwrap());
        assert_eq!(restored_floor(&f).await.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_rollback_completed_event() {
        let f = fixture();
        seed_snapshots(&f, &[0, 2]).await;
        let mut rx = f.bus.subscribe();

        f.resolver.rollback_to_floor("chat-1", 5).await.unwrap();

        match rx.recv().await.unwrap() {
            TrackerEvent::RollbackCompleted {
                target_floor,
                actual_floor,
                snapshot_id,
                ..
            } => {
                assert_eq!(target_floor, 5);
                assert_eq!(actual_floor, 2);
                assert!(snapshot_id.is_some());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
