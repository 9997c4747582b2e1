//! Conversation-mutation and engine events.
//!
//! The hosting application owns the actual pub/sub transport; this module
//! defines the events Keeper consumes and emits, plus the [`EventBus`]
//! seam implementations plug into.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;
use crate::panel::WriteSource;

/// Events carried over the bus.
///
/// Inbound events describe conversation mutations; outbound events report
/// what the engine did. A single enum keeps the wire shape uniform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackerEvent {
    /// A message was stored; panel state should be captured at this floor.
    DataStored {
        conversation_id: String,
        floor_index: u32,
    },
    /// Live chat data changed. Ignored when `source` is `Snapshot` so a
    /// restoration write never re-triggers capture.
    ChatDataChanged {
        conversation_id: String,
        floor_index: u32,
        source: WriteSource,
    },
    /// A message was deleted. `is_user` bypasses rollback for user-authored
    /// messages.
    MessageDeleted {
        conversation_id: String,
        floor_index: u32,
        #[serde(default)]
        is_user: bool,
    },
    /// A message was regenerated in place.
    MessageRegenerated {
        conversation_id: String,
        floor_index: u32,
    },
    /// The active conversation switched.
    ChatChanged { conversation_id: String },
    /// A snapshot was captured and stored.
    SnapshotCreated {
        snapshot_id: String,
        conversation_id: String,
        floor_index: u32,
        timestamp: i64,
    },
    /// A rollback finished. `actual_floor` may differ from `target_floor`
    /// when the fallback search selected an earlier snapshot.
    RollbackCompleted {
        conversation_id: String,
        target_floor: u32,
        actual_floor: u32,
        snapshot_id: Option<String>,
        timestamp: i64,
    },
    /// An internal failure was counted; diagnostics only.
    ErrorReported {
        message: String,
        count: u64,
        timestamp: i64,
    },
}

impl TrackerEvent {
    /// The conversation this event concerns, if any.
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            Self::DataStored {
                conversation_id, ..
            }
            | Self::ChatDataChanged {
                conversation_id, ..
            }
            | Self::MessageDeleted {
                conversation_id, ..
            }
            | Self::MessageRegenerated {
                conversation_id, ..
            }
            | Self::ChatChanged { conversation_id }
            | Self::SnapshotCreated {
                conversation_id, ..
            }
            | Self::RollbackCompleted {
                conversation_id, ..
            } => Some(conversation_id),
            Self::ErrorReported { .. } => None,
        }
    }
}

/// Interface for event delivery between the engine and its host.
///
/// Subscribers get a broadcast receiver; a subscriber that falls behind
/// loses the oldest undelivered events rather than blocking publishers.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes an event to all current subscribers.
    async fn publish(&self, event: TrackerEvent) -> Result<()>;

    /// Subscribes to all events published after this call.
    fn subscribe(&self) -> broadcast::Receiver<TrackerEvent>;
}
