//! State restoration.
//!
//! Writes a chosen snapshot's data back as the canonical live state.
//! Restored panels are tagged with snapshot provenance so listeners
//! reacting to state-change events can tell restoration writes from
//! organic updates and avoid re-triggering capture. Restoration never
//! creates snapshots itself.

use std::sync::Arc;

use tracing::info;

use keeper_core::error::Result;
use keeper_core::panel::{HistoryEntry, HistoryKind, WriteSource};
use keeper_core::scheduler::Clock;
use keeper_core::snapshot::Snapshot;
use keeper_core::store::{keys, KvAdapter};
use keeper_infrastructure::dto::chat_state_to_value;

/// Writes snapshot data back into the live panel state.
pub struct StateRestorer {
    adapter: Arc<dyn KvAdapter>,
    clock: Arc<dyn Clock>,
}

impl StateRestorer {
    /// Creates a new restorer.
    pub fn new(adapter: Arc<dyn KvAdapter>, clock: Arc<dyn Clock>) -> Self {
        Self { adapter, clock }
    }

    /// Makes `snapshot`'s data the conversation's canonical live state.
    ///
    /// Both persisted shapes end up here: tagged snapshots carry their
    /// state verbatim, legacy ones were adapted field-by-field at the load
    /// boundary. Either way the write goes out in the current format.
    pub async fn restore(&self, conversation_id: &str, snapshot: &Snapshot) -> Result<()> {
        let now = self.clock.now_ms();
        let mut state = snapshot.data.clone();

        let panels_touched: Vec<String> = state.panels.keys().cloned().collect();
        for panel in &panels_touched {
            state.tag_write(panel, WriteSource::Snapshot, now);
        }
        state.history.push(HistoryEntry {
            timestamp: now,
            kind: HistoryKind::Rollback,
            panels_touched: panels_touched.clone(),
            note: format!(
                "restored snapshot {} (format v{})",
                snapshot.id, snapshot.metadata.format_version
            ),
        });
        state.last_updated = now;

        let value = chat_state_to_value(&state)?;
        self.adapter
            .set(&keys::chat_state(conversation_id), value)
            .await?;

        info!(
            conversation_id,
            snapshot_id = %snapshot.id,
            floor_index = snapshot.floor_index,
            panels = panels_touched.len(),
            "Restored panel state from snapshot"
        );
        Ok(())
    }
}
