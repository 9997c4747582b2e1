//! Failure accounting and the diagnostic status query.
//!
//! Failures degrade silently: the conversation keeps operating with
//! potentially stale panel data while the counter below records what went
//! wrong for external diagnostics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Mutex;

use serde::Serialize;

use keeper_core::events::{EventBus, TrackerEvent};
use keeper_core::scheduler::Clock;

/// Running count of internal failures, with the most recent message.
#[derive(Debug, Default)]
pub struct ErrorCounter {
    count: AtomicU64,
    last: Mutex<Option<String>>,
}

impl ErrorCounter {
    /// Records a failure; returns the new total.
    pub fn record(&self, message: impl Into<String>) -> u64 {
        let message = message.into();
        *self.last.lock().expect("error counter poisoned") = Some(message);
        self.count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Total failures recorded.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    /// The most recent failure message, if any.
    pub fn last(&self) -> Option<String> {
        self.last.lock().expect("error counter poisoned").clone()
    }
}

/// Logs a failure, counts it, and publishes an `ErrorReported` event.
pub(crate) async fn report_failure(
    bus: &Arc<dyn EventBus>,
    errors: &ErrorCounter,
    clock: &Arc<dyn Clock>,
    message: String,
) {
    tracing::error!(error = %message, "Tracker operation failed");
    let count = errors.record(message.clone());
    // A bus failure here has nowhere better to go than the log.
    if let Err(e) = bus
        .publish(TrackerEvent::ErrorReported {
            message,
            count,
            timestamp: clock.now_ms(),
        })
        .await
    {
        tracing::warn!(error = %e, "Failed to publish error event");
    }
}

/// Snapshot of the tracker's internal health, for external diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerStatus {
    /// Total internal failures since construction.
    pub error_count: u64,
    /// The most recent failure message, if any.
    pub last_error: Option<String>,
    /// Conversations with a loaded snapshot store.
    pub conversations_tracked: usize,
    /// Total snapshots held in memory across conversations.
    pub snapshots_held: usize,
}
