//! Tracker tuning knobs.

use keeper_core::store::DEFAULT_SNAPSHOT_CAPACITY;

/// Configuration shared by the capture and rollback services.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Maximum snapshots retained per conversation.
    pub snapshot_capacity: usize,
    /// Window within which repeated captures of the same
    /// `(conversation, floor)` pair collapse into one.
    pub debounce_ms: i64,
    /// Delay before `SnapshotCreated` is published, so listeners that
    /// could trigger another capture never re-enter synchronously.
    pub emit_delay_ms: u64,
    /// Record a snapshot of the *current* state when a rollback finds
    /// nothing usable to restore.
    pub defensive_snapshots: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            snapshot_capacity: DEFAULT_SNAPSHOT_CAPACITY,
            debounce_ms: 3_000,
            emit_delay_ms: 250,
            defensive_snapshots: true,
        }
    }
}
