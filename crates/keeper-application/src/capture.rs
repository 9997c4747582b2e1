//! Snapshot capture.
//!
//! Builds a snapshot from the live panel state and inserts it into the
//! conversation's store, guarded against duplicate captures and against
//! feedback loops where a snapshot-triggered write re-triggers capture.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use keeper_core::error::Result;
use keeper_core::events::{EventBus, TrackerEvent};
use keeper_core::scheduler::{Clock, TaskScheduler};
use keeper_core::snapshot::Snapshot;
use keeper_core::store::{keys, KvAdapter};
use keeper_infrastructure::dto::{normalize_chat_payload, snapshots_to_value};

use crate::config::TrackerConfig;
use crate::status::{report_failure, ErrorCounter};
use crate::stores::ConversationStores;

/// Options for a single capture call.
#[derive(Debug, Clone, Default)]
pub struct CaptureOptions {
    /// Bypass the debounce guard.
    pub force: bool,
    /// Why this capture happened; logged, not persisted.
    pub reason: Option<String>,
}

impl CaptureOptions {
    /// Options that bypass the debounce guard.
    pub fn forced(reason: impl Into<String>) -> Self {
        Self {
            force: true,
            reason: Some(reason.into()),
        }
    }
}

/// Captures snapshots of live conversation state.
pub struct SnapshotCaptureService {
    adapter: Arc<dyn KvAdapter>,
    bus: Arc<dyn EventBus>,
    scheduler: Arc<dyn TaskScheduler>,
    clock: Arc<dyn Clock>,
    config: TrackerConfig,
    stores: Arc<ConversationStores>,
    errors: Arc<ErrorCounter>,
    /// Last capture time per `(conversation, floor)`, for the debounce
    /// guard.
    recent: RwLock<HashMap<(String, u32), i64>>,
}

impl SnapshotCaptureService {
    /// Creates a new capture service.
    pub fn new(
        adapter: Arc<dyn KvAdapter>,
        bus: Arc<dyn EventBus>,
        scheduler: Arc<dyn TaskScheduler>,
        clock: Arc<dyn Clock>,
        stores: Arc<ConversationStores>,
        errors: Arc<ErrorCounter>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            adapter,
            bus,
            scheduler,
            clock,
            config,
            stores,
            errors,
            recent: RwLock::new(HashMap::new()),
        }
    }

    /// Captures the conversation's current panel state at `floor_index`.
    ///
    /// Returns the new snapshot's id, or `None` when the capture was
    /// debounced or the live state was unusable. Failing to persist the
    /// snapshot list is counted but does not roll back the in-memory
    /// insertion; the store stays authoritative for the session.
    pub async fn create_snapshot(
        &self,
        conversation_id: &str,
        floor_index: u32,
        options: &CaptureOptions,
    ) -> Result<Option<String>> {
        let now = self.clock.now_ms();

        if !options.force && self.is_debounced(conversation_id, floor_index, now).await {
            debug!(
                conversation_id,
                floor_index, "Capture debounced; a recent snapshot already covers this floor"
            );
            return Ok(None);
        }
        self.recent
            .write()
            .await
            .insert((conversation_id.to_string(), floor_index), now);

        let raw = match self.adapter.get(&keys::chat_state(conversation_id)).await {
            Ok(raw) => raw,
            Err(e) => {
                report_failure(
                    &self.bus,
                    &self.errors,
                    &self.clock,
                    format!("capture: failed to read state for {conversation_id}: {e}"),
                )
                .await;
                return Err(e);
            }
        };

        let payload = normalize_chat_payload(raw);
        let Some(state) = payload.into_state() else {
            report_failure(
                &self.bus,
                &self.errors,
                &self.clock,
                format!("capture: live state for {conversation_id} is corrupt; skipping"),
            )
            .await;
            return Ok(None);
        };

        let snapshot = Snapshot::capture(conversation_id, floor_index, state, now);
        let snapshot_id = snapshot.id.clone();
        let panel_count = snapshot.metadata.panel_count;

        let persisted = self
            .stores
            .with_store(conversation_id, |store| {
                store.insert(snapshot);
                store.snapshots().to_vec()
            })
            .await?;

        match snapshots_to_value(&persisted) {
            Ok(value) => {
                if let Err(e) = self
                    .adapter
                    .set(&keys::snapshots(conversation_id), value)
                    .await
                {
                    report_failure(
                        &self.bus,
                        &self.errors,
                        &self.clock,
                        format!("capture: failed to persist snapshots for {conversation_id}: {e}"),
                    )
                    .await;
                }
            }
            Err(e) => {
                report_failure(
                    &self.bus,
                    &self.errors,
                    &self.clock,
                    format!("capture: failed to serialize snapshots for {conversation_id}: {e}"),
                )
                .await;
            }
        }

        info!(
            conversation_id,
            floor_index,
            snapshot_id = %snapshot_id,
            panel_count,
            reason = options.reason.as_deref().unwrap_or("event"),
            "Snapshot captured"
        );

        // Deferred so listeners that capture in response never re-enter
        // synchronously.
        let bus = self.bus.clone();
        let event = TrackerEvent::SnapshotCreated {
            snapshot_id: snapshot_id.clone(),
            conversation_id: conversation_id.to_string(),
            floor_index,
            timestamp: now,
        };
        self.scheduler.schedule(
            self.config.emit_delay_ms,
            Box::pin(async move {
                if let Err(e) = bus.publish(event).await {
                    tracing::warn!(error = %e, "Failed to publish snapshot event");
                }
            }),
        );

        Ok(Some(snapshot_id))
    }

    async fn is_debounced(&self, conversation_id: &str, floor_index: u32, now: i64) -> bool {
        self.recent
            .read()
            .await
            .get(&(conversation_id.to_string(), floor_index))
            .map(|last| now - last < self.config.debounce_ms)
            .unwrap_or(false)
    }

    /// Clears debounce tracking for a conversation (conversation switch).
    pub async fn clear_tracking(&self, conversation_id: &str) {
        self.recent
            .write()
            .await
            .retain(|(id, _), _| id != conversation_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_infrastructure::{BroadcastEventBus, ManualClock, ManualScheduler, MemoryKvAdapter};

    struct Fixture {
        capture: SnapshotCaptureService,
        scheduler: Arc<ManualScheduler>,
        clock: ManualClock,
        adapter: Arc<MemoryKvAdapter>,
        bus: Arc<BroadcastEventBus>,
    }

    fn fixture() -> Fixture {
        let adapter = Arc::new(MemoryKvAdapter::new());
        let bus = Arc::new(BroadcastEventBus::new());
        let clock = ManualClock::new(1_000);
        let scheduler = Arc::new(ManualScheduler::new(clock.clone()));
        let errors = Arc::new(ErrorCounter::default());
        let stores = Arc::new(ConversationStores::new(adapter.clone(), 50));
        let capture = SnapshotCaptureService::new(
            adapter.clone(),
            bus.clone(),
            scheduler.clone(),
            Arc::new(clock.clone()),
            stores,
            errors,
            TrackerConfig::default(),
        );
        Fixture {
            capture,
            scheduler,
            clock,
            adapter,
            bus,
        }
    }

    #[tokio::test]
    async fn test_capture_stores_and_persists() {
        let f = fixture();
        f.adapter
            .set(
                &keys::chat_state("chat-1"),
                serde_json::json!({"stats": {"age": "30"}}),
            )
            .await
            .unwrap();

        let id = f
            .capture
            .create_snapshot("chat-1", 4, &CaptureOptions::default())
            .await
            .unwrap();
        assert!(id.is_some());

        let persisted = f
            .adapter
            .get(&keys::snapshots("chat-1"))
            .await
            .unwrap()
            .expect("snapshot list persisted");
        assert_eq!(persisted.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_debounce_collapses_repeat_captures() {
        let f = fixture();
        let first = f
            .capture
            .create_snapshot("chat-1", 2, &CaptureOptions::default())
            .await
            .unwrap();
        assert!(first.is_some());

        // Same floor within the window: silently skipped.
        f.clock.set(2_000);
        let second = f
            .capture
            .create_snapshot("chat-1", 2, &CaptureOptions::default())
            .await
            .unwrap();
        assert!(second.is_none());

        // After the window it captures again.
        f.clock.set(10_000);
        let third = f
            .capture
            .create_snapshot("chat-1", 2, &CaptureOptions::default())
            .await
            .unwrap();
        assert!(third.is_some());
    }

    #[tokio::test]
    async fn test_force_bypasses_debounce() {
        let f = fixture();
        f.capture
            .create_snapshot("chat-1", 2, &CaptureOptions::default())
            .await
            .unwrap();
        let forced = f
            .capture
            .create_snapshot("chat-1", 2, &CaptureOptions::forced("test"))
            .await
            .unwrap();
        assert!(forced.is_some());
    }

    #[tokio::test]
    async fn test_snapshot_event_is_deferred() {
        let f = fixture();
        let mut rx = f.bus.subscribe();

        f.capture
            .create_snapshot("chat-1", 0, &CaptureOptions::default())
            .await
            .unwrap();

        // Nothing published until virtual time passes the emit delay.
        assert!(rx.try_recv().is_err());
        f.scheduler.advance(250).await;

        match rx.try_recv().unwrap() {
            TrackerEvent::SnapshotCreated {
                conversation_id,
                floor_index,
                ..
            } => {
                assert_eq!(conversation_id, "chat-1");
                assert_eq!(floor_index, 0);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_state_still_captures_well_formed_snapshot() {
        let f = fixture();
        let id = f
            .capture
            .create_snapshot("chat-1", 0, &CaptureOptions::default())
            .await
            .unwrap()
            .expect("capture from empty state");

        let snapshots = f
            .adapter
            .get(&keys::snapshots("chat-1"))
            .await
            .unwrap()
            .unwrap();
        let record = &snapshots.as_array().unwrap()[0];
        assert_eq!(record["id"], serde_json::json!(id));
        assert!(record["data"]["panels"].is_object());
    }
}
