//! Snapshot model.
//!
//! A snapshot is a deep copy of a conversation's [`PanelState`] indexed by
//! the conversation position (floor) it was captured at, together with
//! metadata used for fast corruption checks before a restore.

use serde::{Deserialize, Serialize};

use crate::error::{KeeperError, Result};
use crate::panel::{Panel, PanelState};

/// Current snapshot format version.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 2;

/// Metadata captured alongside a snapshot's data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Number of panels in the captured state.
    pub panel_count: usize,
    /// Serialized size of the captured state in bytes.
    pub size_bytes: usize,
    /// Snapshot format version.
    pub format_version: u32,
    /// Lightweight shape fingerprint, see [`fingerprint`].
    pub fingerprint: String,
}

/// A point-in-time deep copy of one conversation's panel state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unique snapshot identifier (UUID format).
    pub id: String,
    /// The conversation this snapshot belongs to.
    pub conversation_id: String,
    /// Zero-based conversation position at capture time.
    pub floor_index: u32,
    /// Capture timestamp (epoch milliseconds).
    pub timestamp: i64,
    /// Deep copy of the panel state at capture time.
    pub data: PanelState,
    /// Shape metadata for later corruption checks.
    pub metadata: SnapshotMetadata,
}

impl Snapshot {
    /// Captures a snapshot of `data` at the given floor.
    pub fn capture(
        conversation_id: impl Into<String>,
        floor_index: u32,
        data: PanelState,
        now_ms: i64,
    ) -> Self {
        let size_bytes = serde_json::to_vec(&data).map(|b| b.len()).unwrap_or(0);
        let metadata = SnapshotMetadata {
            panel_count: data.panels.len(),
            size_bytes,
            format_version: SNAPSHOT_FORMAT_VERSION,
            fingerprint: fingerprint(&data),
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            floor_index,
            timestamp: now_ms,
            data,
            metadata,
        }
    }

    /// Validates structural well-formedness and recomputes the fingerprint.
    ///
    /// # Errors
    ///
    /// Returns `Validation` when the shape is malformed and `Integrity` when
    /// the recomputed fingerprint does not match the stored one. Both are
    /// handled locally by the rollback fallback search.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(KeeperError::validation("snapshot has an empty id"));
        }
        if self.conversation_id.is_empty() {
            return Err(KeeperError::validation(format!(
                "snapshot {} has an empty conversation id",
                self.id
            )));
        }
        if self.metadata.panel_count != self.data.panels.len() {
            return Err(KeeperError::validation(format!(
                "snapshot {} panel count mismatch: metadata says {}, data has {}",
                self.id,
                self.metadata.panel_count,
                self.data.panels.len()
            )));
        }
        let actual = fingerprint(&self.data);
        if actual != self.metadata.fingerprint {
            return Err(KeeperError::integrity(format!(
                "snapshot {} fingerprint mismatch: expected {}, got {}",
                self.id, self.metadata.fingerprint, actual
            )));
        }
        Ok(())
    }
}

/// Computes the lightweight integrity fingerprint of a panel state.
///
/// Derived from panel and field counts and row shapes, not a full content
/// hash; cheap to recompute at validation time. Panels iterate in key order,
/// so the result is deterministic for equal states.
pub fn fingerprint(state: &PanelState) -> String {
    let mut parts = Vec::with_capacity(state.panels.len());
    for (name, panel) in &state.panels {
        let rows = match panel {
            Panel::Table(rows) => rows.len(),
            Panel::Record(_) => 1,
        };
        parts.push(format!(
            "{}:{}r{}e{}",
            name,
            rows,
            panel.field_count(),
            panel.row_entry_count()
        ));
    }
    format!("fp2;{};{}", state.panels.len(), parts.join("|"))
}

/// A persisted conversation-state payload, normalized at the load boundary.
///
/// Persisted payloads come in several shapes (current tagged format, legacy
/// flat format, or garbage). The infrastructure layer normalizes whatever it
/// reads into this variant; all downstream logic operates only on it.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotPayload {
    /// Nothing persisted yet.
    Empty,
    /// Legacy flat shape, adapted field-by-field.
    Legacy(PanelState),
    /// Current tagged shape, restored verbatim.
    Modern {
        state: PanelState,
        format_version: u32,
    },
    /// Unparseable payload, kept raw for diagnostics.
    Corrupt(serde_json::Value),
}

impl SnapshotPayload {
    /// The panel state carried by this payload, if it is usable.
    pub fn state(&self) -> Option<&PanelState> {
        match self {
            Self::Legacy(state) | Self::Modern { state, .. } => Some(state),
            Self::Empty | Self::Corrupt(_) => None,
        }
    }

    /// Consumes the payload, yielding a usable panel state.
    ///
    /// `Empty` yields a well-formed default state; `Corrupt` yields `None`.
    pub fn into_state(self) -> Option<PanelState> {
        match self {
            Self::Legacy(state) | Self::Modern { state, .. } => Some(state),
            Self::Empty => Some(PanelState::default()),
            Self::Corrupt(_) => None,
        }
    }

    /// Returns true if the payload failed to parse.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt(_))
    }
}
