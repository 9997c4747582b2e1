//! Field merge engine.
//!
//! [`merge_update`] reconciles a panel's existing data with a partial,
//! externally produced update according to the field-enablement
//! configuration. Pure and deterministic given its inputs; the caller
//! supplies the timestamp used for new row records.
//!
//! # Module Structure
//!
//! - `config`: enablement configuration types ([`EnablementConfig`])
//! - `append`: pluggable append-mode detection ([`AppendStrategy`])

mod append;
mod config;

pub use append::{AppendDecision, AppendStrategy, MarkerAppendStrategy};
pub use config::{EnablementConfig, FieldRule, PanelRule};

use crate::panel::{base_field_name, format_timestamp, FieldValue, Panel, Record, RowEntry};

/// Row source label for entries converted from a prior scalar value.
const SOURCE_CARRYOVER: &str = "carryover";
/// Row source label for entries added by a merge.
const SOURCE_MERGE: &str = "merge";

/// Merges an incoming partial update into a panel's existing data.
///
/// Behavior, in order:
/// - Unconfigured panel: non-empty incoming data is accepted wholesale,
///   empty incoming data leaves the existing data unchanged.
/// - Existing fields whose base name is still enabled are carried forward;
///   fields disabled since the last write are dropped.
/// - Incoming fields are filtered by the enablement of their base name
///   (composite keys like `npc3.mood` resolve to `mood`, the original key
///   is preserved in the output). Multi-row fields merge with append
///   semantics; everything else overwrites.
///
/// The output never contains a field outside the enabled set, so merge
/// results are always a subset of the configured schema regardless of what
/// an upstream producer sends.
pub fn merge_update(
    panel_name: &str,
    existing: &Panel,
    incoming: &Panel,
    config: &EnablementConfig,
    strategy: &dyn AppendStrategy,
    now_ms: i64,
) -> Panel {
    let Some(rule) = config.panels.get(panel_name) else {
        return if incoming.is_empty() {
            existing.clone()
        } else {
            incoming.clone()
        };
    };

    match (existing, incoming) {
        (Panel::Record(existing), Panel::Record(incoming)) => {
            Panel::Record(merge_record(existing, incoming, rule, strategy, now_ms))
        }
        // A table on either side promotes both sides to row sequences;
        // rows pair up by position.
        _ => {
            let existing_rows = as_rows(existing);
            let incoming_rows = as_rows(incoming);
            let empty = Record::new();
            let len = existing_rows.len().max(incoming_rows.len());
            let mut merged = Vec::with_capacity(len);
            for i in 0..len {
                let old = existing_rows.get(i).unwrap_or(&empty);
                match incoming_rows.get(i) {
                    Some(new) => merged.push(merge_record(old, new, rule, strategy, now_ms)),
                    // No incoming row: carry the existing row forward,
                    // filtered to the enabled set.
                    None => merged.push(merge_record(old, &empty, rule, strategy, now_ms)),
                }
            }
            Panel::Table(merged)
        }
    }
}

fn as_rows(panel: &Panel) -> Vec<Record> {
    match panel {
        Panel::Table(rows) => rows.clone(),
        Panel::Record(record) => vec![record.clone()],
    }
}

fn merge_record(
    existing: &Record,
    incoming: &Record,
    rule: &PanelRule,
    strategy: &dyn AppendStrategy,
    now_ms: i64,
) -> Record {
    let enabled = rule.enabled_base_names();
    let mut merged = Record::new();

    for (key, value) in existing {
        if enabled.contains(base_field_name(key)) {
            merged.insert(key.clone(), value.clone());
        }
    }

    for (key, value) in incoming {
        let base = base_field_name(key);
        if !enabled.contains(base) {
            // Same-named fields from other panels in the batch stop here.
            continue;
        }
        if rule.is_multi_row(base) {
            let next = merge_multi_row(merged.get(key), value, strategy, now_ms);
            merged.insert(key.clone(), next);
        } else {
            merged.insert(key.clone(), value.clone());
        }
    }

    merged
}

fn merge_multi_row(
    existing: Option<&FieldValue>,
    incoming: &FieldValue,
    strategy: &dyn AppendStrategy,
    now_ms: i64,
) -> FieldValue {
    match incoming {
        FieldValue::Scalar(serde_json::Value::String(text)) => {
            match strategy.classify(text) {
                AppendDecision::Append(content) => {
                    let mut rows = canonical_rows(existing, now_ms);
                    push_deduped(
                        &mut rows,
                        RowEntry {
                            content,
                            timestamp: format_timestamp(now_ms),
                            source: SOURCE_MERGE.to_string(),
                        },
                    );
                    FieldValue::Rows(rows)
                }
                AppendDecision::Overwrite => incoming.clone(),
            }
        }
        FieldValue::Rows(incoming_rows) => {
            let mut rows = canonical_rows(existing, now_ms);
            for entry in incoming_rows {
                let entry = if entry.timestamp.is_empty() {
                    RowEntry {
                        content: entry.content.clone(),
                        timestamp: format_timestamp(now_ms),
                        source: if entry.source.is_empty() {
                            SOURCE_MERGE.to_string()
                        } else {
                            entry.source.clone()
                        },
                    }
                } else {
                    entry.clone()
                };
                push_deduped(&mut rows, entry);
            }
            FieldValue::Rows(rows)
        }
        FieldValue::Scalar(_) => incoming.clone(),
    }
}

/// Converts a field's current value into the canonical row list.
///
/// A prior scalar becomes a single carryover row so append never discards
/// what was there before.
fn canonical_rows(existing: Option<&FieldValue>, now_ms: i64) -> Vec<RowEntry> {
    match existing {
        None => Vec::new(),
        Some(FieldValue::Rows(rows)) => rows.clone(),
        Some(FieldValue::Scalar(value)) => {
            let text = match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => return Vec::new(),
                other => other.to_string(),
            };
            if text.trim().is_empty() {
                return Vec::new();
            }
            vec![RowEntry {
                content: text,
                timestamp: format_timestamp(now_ms),
                source: SOURCE_CARRYOVER.to_string(),
            }]
        }
    }
}

/// Appends a row unless its content duplicates an existing entry.
///
/// Duplicate means the new content is a substring of an existing entry or
/// contains one; blank content is never inserted.
fn push_deduped(rows: &mut Vec<RowEntry>, entry: RowEntry) {
    let content = entry.content.trim();
    if content.is_empty() {
        return;
    }
    let duplicate = rows.iter().any(|row| {
        let prior = row.content.trim();
        !prior.is_empty() && (prior.contains(content) || content.contains(prior))
    });
    if !duplicate {
        rows.push(entry);
    }
}
