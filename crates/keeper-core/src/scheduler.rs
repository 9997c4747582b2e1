//! Time and deferred-task seams.
//!
//! Debounce windows and delayed event emission go through [`Clock`] and
//! [`TaskScheduler`] instead of wall-clock timers so tests can advance
//! virtual time deterministically.

use std::future::Future;
use std::pin::Pin;

/// A deferred unit of work.
pub type ScheduledTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Source of the current time in epoch milliseconds.
pub trait Clock: Send + Sync {
    /// The current time in epoch milliseconds.
    fn now_ms(&self) -> i64;
}

/// Handle to a scheduled task; dropping it does NOT cancel the task.
pub trait TaskHandle: Send + Sync {
    /// Cancels the task if it has not run yet; no-op otherwise.
    fn cancel(&self);
}

/// Schedules tasks to run after a delay.
pub trait TaskScheduler: Send + Sync {
    /// Schedules `task` to run once, `delay_ms` from now.
    fn schedule(&self, delay_ms: u64, task: ScheduledTask) -> Box<dyn TaskHandle>;
}
