//! Panel domain model.
//!
//! This module contains the core structured-data types that Keeper maintains
//! per conversation: panels of fields, write provenance, and the bounded
//! history log.
//!
//! A panel is either a single record of fields or an ordered sequence of
//! records. Some panels address sub-entities through dynamically indexed
//! composite keys of the form `<entityPrefix><index>.<fieldBaseName>`
//! (e.g. `npc3.mood`); [`CompositeKey`] handles parsing those.

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of entries retained in a [`HistoryLog`].
pub const HISTORY_CAP: usize = 50;

/// One record of a multi-row field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowEntry {
    /// The textual content of this row.
    pub content: String,
    /// Timestamp when the row was added (ISO 8601 format).
    pub timestamp: String,
    /// Source of the row ("merge", "carryover", ...).
    pub source: String,
}

/// The value of a single panel field.
///
/// Multi-row fields hold an ordered list of [`RowEntry`] records; everything
/// else is an opaque scalar. The untagged representation keeps persisted
/// data free of enum wrappers, matching what external producers send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Canonical multi-row representation.
    Rows(Vec<RowEntry>),
    /// Any scalar JSON value.
    Scalar(serde_json::Value),
}

impl FieldValue {
    /// Creates a scalar field value from a string.
    pub fn text(value: impl Into<String>) -> Self {
        Self::Scalar(serde_json::Value::String(value.into()))
    }

    /// Returns the scalar as a display string, if this is a scalar.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Scalar(serde_json::Value::String(s)) => Some(s.clone()),
            Self::Scalar(v) => Some(v.to_string()),
            Self::Rows(_) => None,
        }
    }

    /// Returns the row list, if this is a multi-row value.
    pub fn as_rows(&self) -> Option<&[RowEntry]> {
        match self {
            Self::Rows(rows) => Some(rows),
            Self::Scalar(_) => None,
        }
    }
}

/// An ordered map of field name to value; one row of panel data.
pub type Record = BTreeMap<String, FieldValue>;

/// A named structured-data bucket.
///
/// Single-row panels are one record; multi-row panels are an ordered
/// sequence of records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Panel {
    /// Multi-row panel: an ordered sequence of records.
    Table(Vec<Record>),
    /// Single-row panel: one record of fields.
    Record(Record),
}

impl Panel {
    /// Creates an empty single-row panel.
    pub fn empty() -> Self {
        Self::Record(Record::new())
    }

    /// Returns true if the panel carries no fields at all.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Record(record) => record.is_empty(),
            Self::Table(rows) => rows.iter().all(|r| r.is_empty()),
        }
    }

    /// Total number of fields across all rows.
    pub fn field_count(&self) -> usize {
        match self {
            Self::Record(record) => record.len(),
            Self::Table(rows) => rows.iter().map(|r| r.len()).sum(),
        }
    }

    /// Total number of [`RowEntry`] records held by multi-row fields.
    pub fn row_entry_count(&self) -> usize {
        let count = |record: &Record| {
            record
                .values()
                .map(|v| match v {
                    FieldValue::Rows(rows) => rows.len(),
                    FieldValue::Scalar(_) => 0,
                })
                .sum::<usize>()
        };
        match self {
            Self::Record(record) => count(record),
            Self::Table(rows) => rows.iter().map(count).sum(),
        }
    }
}

impl Default for Panel {
    fn default() -> Self {
        Self::empty()
    }
}

/// Where the last write to a panel came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteSource {
    /// A normal producer update.
    Organic,
    /// A restoration write; listeners must not re-trigger capture on these.
    Snapshot,
    /// Output of the field merge engine.
    Merge,
}

/// Per-panel provenance metadata: source of last write and field count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelProvenance {
    /// Source of the last write to this panel.
    pub source: WriteSource,
    /// Field count at the time of the last write.
    pub field_count: usize,
    /// Timestamp of the last write (epoch milliseconds).
    pub updated_at: i64,
}

/// The kind of a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    /// A producer update was merged into panel state.
    DataChange,
    /// Panel state was restored from a snapshot.
    Rollback,
}

/// A single bounded-history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Timestamp of the event (epoch milliseconds).
    pub timestamp: i64,
    /// What happened.
    pub kind: HistoryKind,
    /// Names of the panels the event touched.
    pub panels_touched: Vec<String>,
    /// Free-form note (snapshot id, format version, ...).
    pub note: String,
}

/// Bounded log of state-changing events, oldest trimmed beyond the cap.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryLog {
    #[serde(default)]
    entries: Vec<HistoryEntry>,
}

impl HistoryLog {
    /// Appends an entry, trimming the oldest entries beyond [`HISTORY_CAP`].
    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
        if self.entries.len() > HISTORY_CAP {
            let excess = self.entries.len() - HISTORY_CAP;
            self.entries.drain(..excess);
        }
    }

    /// Entries in chronological order.
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no entries are retained.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The complete live structured state of one conversation.
///
/// Always holds a well-formed `panels` map, even when empty. Mutated only by
/// the capture/restore/merge components, never by external writers directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PanelState {
    /// Mapping from panel name to panel data.
    #[serde(default)]
    pub panels: BTreeMap<String, Panel>,
    /// Per-panel provenance of the last write.
    #[serde(default)]
    pub provenance: BTreeMap<String, PanelProvenance>,
    /// Bounded log of data changes and rollbacks.
    #[serde(default)]
    pub history: HistoryLog,
    /// Timestamp of the last update (epoch milliseconds).
    #[serde(default)]
    pub last_updated: i64,
}

impl PanelState {
    /// Records provenance for a panel after a write.
    pub fn tag_write(&mut self, panel_name: &str, source: WriteSource, now_ms: i64) {
        let field_count = self
            .panels
            .get(panel_name)
            .map(Panel::field_count)
            .unwrap_or(0);
        self.provenance.insert(
            panel_name.to_string(),
            PanelProvenance {
                source,
                field_count,
                updated_at: now_ms,
            },
        );
        self.last_updated = now_ms;
    }
}

/// A parsed dynamically indexed composite key.
///
/// `npc3.mood` parses to prefix `npc`, index `3`, base `mood`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeKey<'a> {
    /// The entity prefix (`npc`).
    pub prefix: &'a str,
    /// The numeric index (`3`).
    pub index: u32,
    /// The base field name (`mood`).
    pub base: &'a str,
}

/// Parses a dynamically indexed composite key.
///
/// Returns `None` for plain keys; enablement checks then use the key itself
/// as the base name.
pub fn parse_composite(key: &str) -> Option<CompositeKey<'_>> {
    let (head, base) = key.split_once('.')?;
    if base.is_empty() {
        return None;
    }
    let digits_at = head.find(|c: char| c.is_ascii_digit())?;
    let (prefix, digits) = head.split_at(digits_at);
    if prefix.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let index = digits.parse().ok()?;
    Some(CompositeKey {
        prefix,
        index,
        base,
    })
}

/// The base field name a key resolves to for enablement checks.
///
/// Composite keys resolve to their base field name; plain keys resolve to
/// themselves.
pub fn base_field_name(key: &str) -> &str {
    match parse_composite(key) {
        Some(composite) => composite.base,
        None => key,
    }
}

/// Formats an epoch-milliseconds timestamp as RFC 3339.
pub fn format_timestamp(epoch_ms: i64) -> String {
    Utc.timestamp_millis_opt(epoch_ms)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| epoch_ms.to_string())
}
