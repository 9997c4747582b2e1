//! Data Transfer Objects (DTOs) for persistence.
//!
//! These DTOs represent the versioned schema for persisted conversation
//! state and snapshot arrays. They are private to the infrastructure layer
//! and handle the evolution of the storage format over time.
//!
//! ## Schema Versioning
//!
//! - **V1**: legacy flat shape — a bare panel-name → fields map with no
//!   schema tag, provenance, or history.
//! - **V2 (2.0.0)**: current tagged shape — `schema_version` plus panels,
//!   provenance, and the bounded history log.
//!
//! Whatever shape is read gets normalized into
//! [`SnapshotPayload`](keeper_core::snapshot::SnapshotPayload) at this
//! boundary; downstream logic never sees raw payloads.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use keeper_core::error::Result;
use keeper_core::panel::{HistoryLog, Panel, PanelProvenance, PanelState};
use keeper_core::snapshot::{fingerprint, Snapshot, SnapshotMetadata, SnapshotPayload};

/// Current schema version for persisted conversation state.
pub const CHAT_STATE_V2_VERSION: &str = "2.0.0";

/// Represents V1 of the conversation state schema.
///
/// Legacy flat shape: a bare mapping from panel name to panel data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatStateV1 {
    /// Panel data keyed by panel name.
    pub panels: BTreeMap<String, Panel>,
}

/// Represents V2 of the conversation state schema.
///
/// This struct is what is actually written to and read from storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatStateV2 {
    /// The schema version of this data structure.
    pub schema_version: String,
    /// Panel data keyed by panel name.
    #[serde(default)]
    pub panels: BTreeMap<String, Panel>,
    /// Per-panel provenance of the last write.
    #[serde(default)]
    pub provenance: BTreeMap<String, PanelProvenance>,
    /// Bounded history of data changes and rollbacks.
    #[serde(default)]
    pub history: HistoryLog,
    /// Timestamp of the last update (epoch milliseconds).
    #[serde(default)]
    pub last_updated: i64,
}

/// Convert legacy V1 state to the domain model, field by field.
impl From<ChatStateV1> for PanelState {
    fn from(dto: ChatStateV1) -> Self {
        PanelState {
            panels: dto.panels,
            provenance: BTreeMap::new(),
            history: HistoryLog::default(),
            last_updated: 0,
        }
    }
}

/// Convert V2 DTO to the domain model.
impl From<ChatStateV2> for PanelState {
    fn from(dto: ChatStateV2) -> Self {
        PanelState {
            panels: dto.panels,
            provenance: dto.provenance,
            history: dto.history,
            last_updated: dto.last_updated,
        }
    }
}

/// Convert the domain model to the V2 DTO for persistence.
impl From<&PanelState> for ChatStateV2 {
    fn from(state: &PanelState) -> Self {
        ChatStateV2 {
            schema_version: CHAT_STATE_V2_VERSION.to_string(),
            panels: state.panels.clone(),
            provenance: state.provenance.clone(),
            history: state.history.clone(),
            last_updated: state.last_updated,
        }
    }
}

/// Major component of a `schema_version` string ("2.0.0" -> 2).
fn major_version(version: &str) -> u32 {
    version
        .split('.')
        .next()
        .and_then(|major| major.parse().ok())
        .unwrap_or(0)
}

/// Normalizes a raw persisted conversation-state payload.
///
/// This is the single load boundary for the polymorphic shapes found in
/// storage: absent payloads become `Empty`, tagged payloads parse as V2,
/// untagged objects as legacy V1, and anything else is `Corrupt` with the
/// raw value retained for diagnostics.
pub fn normalize_chat_payload(raw: Option<serde_json::Value>) -> SnapshotPayload {
    let Some(raw) = raw else {
        return SnapshotPayload::Empty;
    };
    if raw.is_null() {
        return SnapshotPayload::Empty;
    }
    if !raw.is_object() {
        return SnapshotPayload::Corrupt(raw);
    }

    let tagged = raw
        .as_object()
        .map(|obj| obj.contains_key("schema_version"))
        .unwrap_or(false);

    if tagged {
        let version = raw
            .get("schema_version")
            .and_then(|v| v.as_str())
            .map(major_version)
            .unwrap_or(0);
        match serde_json::from_value::<ChatStateV2>(raw.clone()) {
            Ok(dto) => SnapshotPayload::Modern {
                state: dto.into(),
                format_version: version,
            },
            Err(e) => {
                tracing::warn!(error = %e, "Tagged conversation state failed to parse");
                SnapshotPayload::Corrupt(raw)
            }
        }
    } else {
        match serde_json::from_value::<ChatStateV1>(raw.clone()) {
            Ok(dto) => SnapshotPayload::Legacy(dto.into()),
            Err(e) => {
                tracing::warn!(error = %e, "Legacy conversation state failed to parse");
                SnapshotPayload::Corrupt(raw)
            }
        }
    }
}

/// Serializes the domain state as the current tagged shape.
pub fn chat_state_to_value(state: &PanelState) -> Result<serde_json::Value> {
    let dto = ChatStateV2::from(state);
    Ok(serde_json::to_value(dto)?)
}

// ============================================================================
// Snapshot record DTOs
// ============================================================================

/// Represents V1 of a persisted snapshot record.
///
/// Legacy records carry no metadata; an id may be missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecordV1 {
    /// Snapshot id, generated on adaptation when missing.
    #[serde(default)]
    pub id: Option<String>,
    /// Conversation position at capture time.
    pub floor_index: u32,
    /// Capture timestamp (epoch milliseconds).
    #[serde(default)]
    pub timestamp: i64,
    /// The captured panel data, legacy flat shape.
    pub data: ChatStateV1,
}

/// Represents V2 of a persisted snapshot record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecordV2 {
    /// The schema version of this record.
    pub schema_version: String,
    /// Snapshot id.
    pub id: String,
    /// The conversation this snapshot belongs to.
    pub conversation_id: String,
    /// Conversation position at capture time.
    pub floor_index: u32,
    /// Capture timestamp (epoch milliseconds).
    pub timestamp: i64,
    /// The captured panel state.
    pub data: ChatStateV2,
    /// Shape metadata for corruption checks.
    pub metadata: SnapshotMetadata,
}

impl From<&Snapshot> for SnapshotRecordV2 {
    fn from(snapshot: &Snapshot) -> Self {
        SnapshotRecordV2 {
            schema_version: CHAT_STATE_V2_VERSION.to_string(),
            id: snapshot.id.clone(),
            conversation_id: snapshot.conversation_id.clone(),
            floor_index: snapshot.floor_index,
            timestamp: snapshot.timestamp,
            data: ChatStateV2::from(&snapshot.data),
            metadata: snapshot.metadata.clone(),
        }
    }
}

impl From<SnapshotRecordV2> for Snapshot {
    fn from(record: SnapshotRecordV2) -> Self {
        Snapshot {
            id: record.id,
            conversation_id: record.conversation_id,
            floor_index: record.floor_index,
            timestamp: record.timestamp,
            data: record.data.into(),
            metadata: record.metadata,
        }
    }
}

impl SnapshotRecordV1 {
    /// Adapts a legacy record into the domain model.
    ///
    /// Metadata is recomputed from the data so integrity checks hold for
    /// adapted records; `format_version` 1 marks the legacy origin.
    fn adapt(self, conversation_id: &str) -> Snapshot {
        let data: PanelState = self.data.into();
        let size_bytes = serde_json::to_vec(&data).map(|b| b.len()).unwrap_or(0);
        let metadata = SnapshotMetadata {
            panel_count: data.panels.len(),
            size_bytes,
            format_version: 1,
            fingerprint: fingerprint(&data),
        };
        Snapshot {
            id: self
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            conversation_id: conversation_id.to_string(),
            floor_index: self.floor_index,
            timestamp: self.timestamp,
            data,
            metadata,
        }
    }
}

/// Serializes a snapshot list as the current record format.
pub fn snapshots_to_value(snapshots: &[Snapshot]) -> Result<serde_json::Value> {
    let records: Vec<SnapshotRecordV2> = snapshots.iter().map(SnapshotRecordV2::from).collect();
    Ok(serde_json::to_value(records)?)
}

/// Parses a persisted snapshot array, adapting legacy records.
///
/// Unparseable entries are skipped with a warning rather than failing the
/// whole list; a missing or non-array payload yields an empty list.
pub fn snapshots_from_value(
    conversation_id: &str,
    raw: Option<serde_json::Value>,
) -> Vec<Snapshot> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    let Some(entries) = raw.as_array() else {
        tracing::warn!(
            conversation_id,
            "Persisted snapshot payload is not an array; ignoring"
        );
        return Vec::new();
    };

    let mut snapshots = Vec::with_capacity(entries.len());
    for entry in entries {
        let tagged = entry
            .as_object()
            .map(|obj| obj.contains_key("schema_version"))
            .unwrap_or(false);
        if tagged {
            match serde_json::from_value::<SnapshotRecordV2>(entry.clone()) {
                Ok(record) => snapshots.push(record.into()),
                Err(e) => {
                    tracing::warn!(conversation_id, error = %e, "Skipping unparseable snapshot record");
                }
            }
        } else {
            match serde_json::from_value::<SnapshotRecordV1>(entry.clone()) {
                Ok(record) => snapshots.push(record.adapt(conversation_id)),
                Err(e) => {
                    tracing::warn!(conversation_id, error = %e, "Skipping unparseable legacy snapshot record");
                }
            }
        }
    }
    snapshots
}
