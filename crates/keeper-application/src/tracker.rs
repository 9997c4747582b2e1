//! The tracker facade.
//!
//! Wires conversation-mutation events to the capture and rollback
//! services, applies externally produced panel updates through the merge
//! engine, and answers the diagnostic status query.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, error, warn};

use keeper_core::error::{KeeperError, Result};
use keeper_core::events::{EventBus, TrackerEvent};
use keeper_core::merge::{merge_update, AppendStrategy, EnablementConfig, MarkerAppendStrategy};
use keeper_core::panel::{HistoryEntry, HistoryKind, Panel, WriteSource};
use keeper_core::scheduler::{Clock, TaskScheduler};
use keeper_core::store::{keys, KvAdapter};
use keeper_infrastructure::dto::{chat_state_to_value, normalize_chat_payload};

use crate::capture::{CaptureOptions, SnapshotCaptureService};
use crate::config::TrackerConfig;
use crate::restore::StateRestorer;
use crate::rollback::RollbackResolver;
use crate::status::{report_failure, ErrorCounter, TrackerStatus};
use crate::stores::ConversationStores;

/// Conversation panel tracker.
///
/// Owns the capture service, the rollback resolver, and the merge
/// configuration; consumes bus events via [`run`](Self::run) or
/// [`handle_event`](Self::handle_event).
pub struct PanelTracker {
    adapter: Arc<dyn KvAdapter>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    capture: Arc<SnapshotCaptureService>,
    resolver: Arc<RollbackResolver>,
    stores: Arc<ConversationStores>,
    enablement: EnablementConfig,
    strategy: Arc<dyn AppendStrategy>,
    errors: Arc<ErrorCounter>,
}

impl PanelTracker {
    /// Creates a tracker with the default append strategy.
    pub fn new(
        adapter: Arc<dyn KvAdapter>,
        bus: Arc<dyn EventBus>,
        scheduler: Arc<dyn TaskScheduler>,
        clock: Arc<dyn Clock>,
        enablement: EnablementConfig,
        config: TrackerConfig,
    ) -> Self {
        let errors = Arc::new(ErrorCounter::default());
        let stores = Arc::new(ConversationStores::new(
            adapter.clone(),
            config.snapshot_capacity,
        ));
        let capture = Arc::new(SnapshotCaptureService::new(
            adapter.clone(),
            bus.clone(),
            scheduler,
            clock.clone(),
            stores.clone(),
            errors.clone(),
            config.clone(),
        ));
        let restorer = StateRestorer::new(adapter.clone(), clock.clone());
        let resolver = Arc::new(RollbackResolver::new(
            bus.clone(),
            clock.clone(),
            stores.clone(),
            restorer,
            capture.clone(),
            errors.clone(),
            config,
        ));
        Self {
            adapter,
            bus,
            clock,
            capture,
            resolver,
            stores,
            enablement,
            strategy: Arc::new(MarkerAppendStrategy),
            errors,
        }
    }

    /// Replaces the append-mode detection strategy.
    pub fn with_append_strategy(mut self, strategy: Arc<dyn AppendStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Consumes bus events until the bus is closed.
    pub async fn run(self: Arc<Self>) {
        let mut rx = self.bus.subscribe();
        loop {
            match rx.recv().await {
                Ok(event) => self.handle_event(event).await,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Tracker lagged behind the event bus");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Routes one event to the matching operation.
    ///
    /// Failures are already counted where they happen; here they only end
    /// the handling of this event.
    pub async fn handle_event(&self, event: TrackerEvent) {
        match event {
            TrackerEvent::DataStored {
                conversation_id,
                floor_index,
            } => {
                if let Err(e) = self
                    .capture
                    .create_snapshot(&conversation_id, floor_index, &CaptureOptions::default())
                    .await
                {
                    error!(conversation_id, error = %e, "Capture after stored message failed");
                }
            }
            TrackerEvent::ChatDataChanged {
                conversation_id,
                floor_index,
                source,
            } => {
                // Restoration writes must not re-trigger capture.
                if source == WriteSource::Snapshot {
                    debug!(conversation_id, "Ignoring snapshot-tagged data change");
                    return;
                }
                if let Err(e) = self
                    .capture
                    .create_snapshot(&conversation_id, floor_index, &CaptureOptions::default())
                    .await
                {
                    error!(conversation_id, error = %e, "Capture after data change failed");
                }
            }
            TrackerEvent::MessageDeleted {
                conversation_id,
                floor_index,
                is_user,
            } => {
                if is_user {
                    debug!(
                        conversation_id,
                        floor_index, "Skipping rollback for user-authored deletion"
                    );
                    return;
                }
                let target = floor_index.saturating_sub(1);
                if let Err(e) = self.resolver.rollback_to_floor(&conversation_id, target).await {
                    error!(conversation_id, target, error = %e, "Rollback after deletion failed");
                }
            }
            TrackerEvent::MessageRegenerated {
                conversation_id,
                floor_index,
            } => {
                let target = floor_index.saturating_sub(1);
                if let Err(e) = self.resolver.rollback_to_floor(&conversation_id, target).await {
                    error!(conversation_id, target, error = %e, "Rollback after regeneration failed");
                }
            }
            TrackerEvent::ChatChanged { conversation_id } => {
                self.capture.clear_tracking(&conversation_id).await;
                self.resolver.clear_tracking(&conversation_id).await;
                debug!(conversation_id, "Cleared per-conversation tracking");
            }
            // The tracker's own notifications.
            TrackerEvent::SnapshotCreated { .. }
            | TrackerEvent::RollbackCompleted { .. }
            | TrackerEvent::ErrorReported { .. } => {}
        }
    }

    /// Merges a batch of externally produced panel updates into the live
    /// state, one panel at a time, and persists the result.
    pub async fn apply_update(
        &self,
        conversation_id: &str,
        updates: BTreeMap<String, Panel>,
    ) -> Result<()> {
        let now = self.clock.now_ms();

        let raw = match self.adapter.get(&keys::chat_state(conversation_id)).await {
            Ok(raw) => raw,
            Err(e) => {
                report_failure(
                    &self.bus,
                    &self.errors,
                    &self.clock,
                    format!("update: failed to read state for {conversation_id}: {e}"),
                )
                .await;
                return Err(e);
            }
        };
        let Some(mut state) = normalize_chat_payload(raw).into_state() else {
            let message = format!("update: live state for {conversation_id} is corrupt");
            report_failure(&self.bus, &self.errors, &self.clock, message.clone()).await;
            return Err(KeeperError::validation(message));
        };

        let mut panels_touched = Vec::with_capacity(updates.len());
        for (panel_name, incoming) in updates {
            let existing = state.panels.get(&panel_name).cloned().unwrap_or_default();
            let merged = merge_update(
                &panel_name,
                &existing,
                &incoming,
                &self.enablement,
                self.strategy.as_ref(),
                now,
            );
            state.panels.insert(panel_name.clone(), merged);
            state.tag_write(&panel_name, WriteSource::Merge, now);
            panels_touched.push(panel_name);
        }
        state.history.push(HistoryEntry {
            timestamp: now,
            kind: HistoryKind::DataChange,
            panels_touched,
            note: "merged producer update".to_string(),
        });

        let value = chat_state_to_value(&state)?;
        if let Err(e) = self
            .adapter
            .set(&keys::chat_state(conversation_id), value)
            .await
        {
            report_failure(
                &self.bus,
                &self.errors,
                &self.clock,
                format!("update: failed to persist state for {conversation_id}: {e}"),
            )
            .await;
            return Err(e);
        }
        Ok(())
    }

    /// Captures a snapshot directly, outside the event flow.
    pub async fn create_snapshot(
        &self,
        conversation_id: &str,
        floor_index: u32,
        options: &CaptureOptions,
    ) -> Result<Option<String>> {
        self.capture
            .create_snapshot(conversation_id, floor_index, options)
            .await
    }

    /// Rolls back directly, outside the event flow.
    pub async fn rollback_to_floor(&self, conversation_id: &str, target_floor: u32) -> Result<bool> {
        self.resolver
            .rollback_to_floor(conversation_id, target_floor)
            .await
    }

    /// The conversation's position after its last successful restore.
    pub async fn current_floor(&self, conversation_id: &str) -> Option<u32> {
        self.resolver.current_floor(conversation_id).await
    }

    /// Snapshots held for one conversation, loading its store if needed.
    pub async fn snapshot_count(&self, conversation_id: &str) -> Result<usize> {
        self.stores.with_store(conversation_id, |store| store.len()).await
    }

    /// Explicit conversation teardown: drops the in-memory store and
    /// deletes the persisted keys. This is the only operation that clears
    /// data; rollback never does.
    pub async fn teardown(&self, conversation_id: &str) -> Result<()> {
        self.stores.remove(conversation_id).await;
        self.capture.clear_tracking(conversation_id).await;
        self.resolver.clear_tracking(conversation_id).await;
        self.adapter
            .delete(&keys::chat_state(conversation_id))
            .await?;
        self.adapter
            .delete(&keys::snapshots(conversation_id))
            .await?;
        Ok(())
    }

    /// Internal health, for external diagnostics.
    pub async fn status(&self) -> TrackerStatus {
        TrackerStatus {
            error_count: self.errors.count(),
            last_error: self.errors.last(),
            conversations_tracked: self.stores.conversation_count().await,
            snapshots_held: self.stores.total_snapshots().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_core::merge::FieldRule;
    use keeper_core::panel::{FieldValue, Record};
    use keeper_core::snapshot::SnapshotPayload;
    use keeper_infrastructure::{BroadcastEventBus, ManualClock, ManualScheduler, MemoryKvAdapter};

    struct Fixture {
        tracker: PanelTracker,
        adapter: Arc<MemoryKvAdapter>,
        clock: ManualClock,
    }

    fn fixture(enablement: EnablementConfig) -> Fixture {
        let adapter = Arc::new(MemoryKvAdapter::new());
        let bus = Arc::new(BroadcastEventBus::new());
        let clock = ManualClock::new(1_000);
        let scheduler = Arc::new(ManualScheduler::new(clock.clone()));
        let tracker = PanelTracker::new(
            adapter.clone(),
            bus,
            scheduler,
            Arc::new(clock.clone()),
            enablement,
            TrackerConfig::default(),
        );
        Fixture {
            tracker,
            adapter,
            clock,
        }
    }

    async fn live_panel(f: &Fixture, panel: &str) -> Option<Panel> {
        let raw = f.adapter.get(&keys::chat_state("chat-1")).await.unwrap();
        normalize_chat_payload(raw)
            .into_state()?
            .panels
            .get(panel)
            .cloned()
    }

    #[tokio::test]
    async fn test_apply_update_filters_through_enablement() {
        let config = EnablementConfig::default()
            .with_panel("stats", [("age", FieldRule::enabled())]);
        let f = fixture(config);

        let mut incoming = Record::new();
        incoming.insert("age".into(), FieldValue::text("31"));
        incoming.insert("name".into(), FieldValue::text("Ash"));
        let mut updates = BTreeMap::new();
        updates.insert("stats".to_string(), Panel::Record(incoming));

        f.tracker.apply_update("chat-1", updates).await.unwrap();

        match live_panel(&f, "stats").await.unwrap() {
            Panel::Record(record) => {
                assert_eq!(record.get("age"), Some(&FieldValue::text("31")));
                assert!(!record.contains_key("name"));
            }
            Panel::Table(_) => panic!("expected a record"),
        }

        // Provenance and history reflect the merge.
        let raw = f.adapter.get(&keys::chat_state("chat-1")).await.unwrap();
        let state = match normalize_chat_payload(raw) {
            SnapshotPayload::Modern { state, .. } => state,
            other => panic!("expected modern payload, got {other:?}"),
        };
        assert_eq!(
            state.provenance.get("stats").map(|p| p.source),
            Some(WriteSource::Merge)
        );
        assert_eq!(state.history.len(), 1);
        assert_eq!(state.history.entries()[0].kind, HistoryKind::DataChange);
    }

    #[tokio::test]
    async fn test_snapshot_tagged_change_does_not_capture() {
        let f = fixture(EnablementConfig::default());

        f.tracker
            .handle_event(TrackerEvent::ChatDataChanged {
                conversation_id: "chat-1".into(),
                floor_index: 2,
                source: WriteSource::Snapshot,
            })
            .await;
        assert_eq!(f.tracker.status().await.snapshots_held, 0);

        f.tracker
            .handle_event(TrackerEvent::ChatDataChanged {
                conversation_id: "chat-1".into(),
                floor_index: 2,
                source: WriteSource::Organic,
            })
            .await;
        assert_eq!(f.tracker.status().await.snapshots_held, 1);
    }

    #[tokio::test]
    async fn test_user_authored_deletion_bypasses_rollback() {
        let f = fixture(EnablementConfig::default());
        f.tracker
            .create_snapshot("chat-1", 0, &CaptureOptions::default())
            .await
            .unwrap();

        f.tracker
            .handle_event(TrackerEvent::MessageDeleted {
                conversation_id: "chat-1".into(),
                floor_index: 3,
                is_user: true,
            })
            .await;
        assert_eq!(f.tracker.current_floor("chat-1").await, None);
    }

    #[tokio::test]
    async fn test_chat_changed_resets_debounce() {
        let f = fixture(EnablementConfig::default());
        f.tracker
            .create_snapshot("chat-1", 2, &CaptureOptions::default())
            .await
            .unwrap();

        // Within the window, same floor: debounced.
        f.clock.set(1_500);
        assert!(f
            .tracker
            .create_snapshot("chat-1", 2, &CaptureOptions::default())
            .await
            .unwrap()
            .is_none());

        f.tracker
            .handle_event(TrackerEvent::ChatChanged {
                conversation_id: "chat-1".into(),
            })
            .await;
        assert!(f
            .tracker
            .create_snapshot("chat-1", 2, &CaptureOptions::default())
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_teardown_clears_state_and_snapshots() {
        let f = fixture(EnablementConfig::default());
        let mut updates = BTreeMap::new();
        let mut record = Record::new();
        record.insert("age".into(), FieldValue::text("30"));
        updates.insert("stats".to_string(), Panel::Record(record));
        f.tracker.apply_update("chat-1", updates).await.unwrap();
        f.tracker
            .create_snapshot("chat-1", 0, &CaptureOptions::default())
            .await
            .unwrap();

        f.tracker.teardown("chat-1").await.unwrap();
        assert_eq!(f.adapter.get(&keys::chat_state("chat-1")).await.unwrap(), None);
        assert_eq!(f.adapter.get(&keys::snapshots("chat-1")).await.unwrap(), None);
        assert_eq!(f.tracker.status().await.snapshots_held, 0);
    }
}
