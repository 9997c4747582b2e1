//! Clock and scheduler implementations.
//!
//! [`SystemClock`] and [`TokioScheduler`] are the production pair;
//! [`ManualClock`] and [`ManualScheduler`] drive virtual time in tests so
//! debounce windows and delayed emission are deterministic.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use keeper_core::scheduler::{Clock, ScheduledTask, TaskHandle, TaskScheduler};

/// Wall-clock time source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Scheduler running tasks on the tokio runtime after a real delay.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

struct TokioTaskHandle {
    handle: tokio::task::JoinHandle<()>,
}

impl TaskHandle for TokioTaskHandle {
    fn cancel(&self) {
        self.handle.abort();
    }
}

impl TaskScheduler for TokioScheduler {
    fn schedule(&self, delay_ms: u64, task: ScheduledTask) -> Box<dyn TaskHandle> {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            task.await;
        });
        Box::new(TokioTaskHandle { handle })
    }
}

/// Manually advanced time source for tests.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    /// Creates a clock starting at `start_ms`.
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    /// Sets the current time.
    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

struct QueuedTask {
    due_ms: i64,
    seq: u64,
    task: ScheduledTask,
    cancelled: Arc<AtomicBool>,
}

struct ManualTaskHandle {
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle for ManualTaskHandle {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Scheduler that only runs tasks when time is advanced explicitly.
///
/// Shares its clock with the code under test; `advance` moves time forward
/// and runs every due task in due order, including tasks scheduled by the
/// tasks themselves.
pub struct ManualScheduler {
    clock: ManualClock,
    queue: Mutex<Vec<QueuedTask>>,
    next_seq: AtomicU64,
}

impl ManualScheduler {
    /// Creates a scheduler driving (and driven by) the given clock.
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            queue: Mutex::new(Vec::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// The shared clock.
    pub fn clock(&self) -> ManualClock {
        self.clock.clone()
    }

    /// Number of queued (not yet run, not cancelled) tasks.
    pub fn pending(&self) -> usize {
        self.queue
            .lock()
            .expect("scheduler queue poisoned")
            .iter()
            .filter(|t| !t.cancelled.load(Ordering::SeqCst))
            .count()
    }

    /// Advances virtual time by `delta_ms`, running every task that comes
    /// due, in due order.
    pub async fn advance(&self, delta_ms: i64) {
        let target = self.clock.now_ms() + delta_ms;
        loop {
            let next = {
                let mut queue = self.queue.lock().expect("scheduler queue poisoned");
                queue.retain(|t| !t.cancelled.load(Ordering::SeqCst));
                let index = queue
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.due_ms <= target)
                    .min_by_key(|(_, t)| (t.due_ms, t.seq))
                    .map(|(i, _)| i);
                index.map(|i| queue.remove(i))
            };
            match next {
                Some(entry) => {
                    if entry.due_ms > self.clock.now_ms() {
                        self.clock.set(entry.due_ms);
                    }
                    entry.task.await;
                }
                None => break,
            }
        }
        self.clock.set(target);
    }
}

impl TaskScheduler for ManualScheduler {
    fn schedule(&self, delay_ms: u64, task: ScheduledTask) -> Box<dyn TaskHandle> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let entry = QueuedTask {
            due_ms: self.clock.now_ms() + delay_ms as i64,
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            task,
            cancelled: cancelled.clone(),
        };
        self.queue
            .lock()
            .expect("scheduler queue poisoned")
            .push(entry);
        Box::new(ManualTaskHandle { cancelled })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_scheduler_runs_due_tasks_in_order() {
        let clock = ManualClock::new(0);
        let scheduler = ManualScheduler::new(clock.clone());
        let order = Arc::new(Mutex::new(Vec::new()));

        for (delay, label) in [(200u64, "b"), (100, "a"), (500, "c")] {
            let order = order.clone();
            scheduler.schedule(
                delay,
                Box::pin(async move {
                    order.lock().unwrap().push(label);
                }),
            );
        }

        scheduler.advance(300).await;
        assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);
        assert_eq!(scheduler.pending(), 1);
        assert_eq!(clock.now_ms(), 300);

        scheduler.advance(300).await;
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_cancelled_task_does_not_run() {
        let scheduler = ManualScheduler::new(ManualClock::new(0));
        let ran = Arc::new(AtomicBool::new(false));

        let flag = ran.clone();
        let handle = scheduler.schedule(
            50,
            Box::pin(async move {
                flag.store(true, Ordering::SeqCst);
            }),
        );
        handle.cancel();

        scheduler.advance(100).await;
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn test_tokio_scheduler_runs_task() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        TokioScheduler.schedule(
            1,
            Box::pin(async move {
                flag.store(true, Ordering::SeqCst);
            }),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(ran.load(Ordering::SeqCst));
    }
}
