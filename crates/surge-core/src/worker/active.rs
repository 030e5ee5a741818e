//! Live tracking of the range each worker is processing.
//!
//! `stop_at` is the work-stealing seam: a balancer may lower it while the
//! owning worker streams, and the worker re-reads it before every write.
//! `current_offset` only grows and never passes `stop_at`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::task::{align_down, Task};

/// Sliding window over which instantaneous speed is measured.
pub const SPEED_WINDOW: Duration = Duration::from_secs(2);

/// One in-flight range. All timestamps are nanoseconds relative to the
/// session `epoch` so they fit atomics.
pub struct ActiveTask {
    task: Task,
    current_offset: AtomicU64,
    stop_at: AtomicU64,
    last_activity: AtomicU64,
    window_start: AtomicU64,
    window_bytes: AtomicU64,
    /// EMA speed in bytes/sec, stored as f64 bits.
    speed_bits: AtomicU64,
    started_at: u64,
    epoch: Instant,
    cancel: CancelToken,
}

impl ActiveTask {
    pub fn new(task: Task, epoch: Instant, cancel: CancelToken) -> Self {
        let now = epoch.elapsed().as_nanos() as u64;
        Self {
            task,
            current_offset: AtomicU64::new(task.offset),
            stop_at: AtomicU64::new(task.end()),
            last_activity: AtomicU64::new(now),
            window_start: AtomicU64::new(now),
            window_bytes: AtomicU64::new(0),
            speed_bits: AtomicU64::new(0f64.to_bits()),
            started_at: now,
            epoch,
            cancel,
        }
    }

    /// The range as registered (a retry registers the remaining suffix).
    pub fn task(&self) -> Task {
        self.task
    }

    pub fn cancel_handle(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn current_offset(&self) -> u64 {
        self.current_offset.load(Ordering::Acquire)
    }

    pub fn stop_at(&self) -> u64 {
        self.stop_at.load(Ordering::Acquire)
    }

    /// Bytes still owed: `max(0, stop_at - current_offset)`.
    pub fn remaining(&self) -> u64 {
        self.stop_at().saturating_sub(self.current_offset())
    }

    /// The still-owed range as a task, or `None` when nothing remains.
    pub fn remaining_task(&self) -> Option<Task> {
        let offset = self.current_offset();
        let stop = self.stop_at();
        if offset >= stop {
            return None;
        }
        Some(Task::new(offset, stop - offset))
    }

    fn now_nanos(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Records `n` freshly written bytes: advances the offset, stamps
    /// activity, and folds the 2 s window into the EMA speed when it
    /// closes. Only the owning worker calls this.
    pub fn advance(&self, n: u64, ema_alpha: f64) {
        let now = self.now_nanos();
        self.current_offset.fetch_add(n, Ordering::AcqRel);
        self.last_activity.store(now, Ordering::Release);
        self.window_bytes.fetch_add(n, Ordering::AcqRel);

        let window_start = self.window_start.load(Ordering::Acquire);
        let elapsed = now.saturating_sub(window_start);
        if elapsed >= SPEED_WINDOW.as_nanos() as u64 {
            let bytes = self.window_bytes.swap(0, Ordering::AcqRel);
            let instant = bytes as f64 / (elapsed as f64 / 1e9);
            let prev = f64::from_bits(self.speed_bits.load(Ordering::Acquire));
            let ema = if prev == 0.0 {
                instant
            } else {
                (1.0 - ema_alpha) * prev + ema_alpha * instant
            };
            self.speed_bits.store(ema.to_bits(), Ordering::Release);
            self.window_start.store(now, Ordering::Release);
        }
    }

    /// Smoothed speed in bytes/sec; 0 until the first window closes.
    pub fn speed(&self) -> f64 {
        f64::from_bits(self.speed_bits.load(Ordering::Acquire))
    }

    /// Time since this task was registered.
    pub fn age(&self) -> Duration {
        Duration::from_nanos(self.now_nanos().saturating_sub(self.started_at))
    }

    /// Time since the last byte arrived.
    pub fn idle_for(&self) -> Duration {
        Duration::from_nanos(
            self.now_nanos()
                .saturating_sub(self.last_activity.load(Ordering::Acquire)),
        )
    }

    /// Work stealing: takes the aligned back half of the remaining range by
    /// lowering `stop_at`, returning the stolen piece as a new task. Fails
    /// when less than `2 * min_chunk`-ish remains (the split must be at
    /// least `min_chunk`) or when the owner raced us.
    pub fn steal_tail(&self, min_chunk: u64) -> Option<Task> {
        let old_stop = self.stop_at.load(Ordering::Acquire);
        let offset = self.current_offset.load(Ordering::Acquire);
        let remaining = old_stop.saturating_sub(offset);
        let keep = align_down(remaining / 2);
        if keep < min_chunk {
            return None;
        }
        let new_stop = offset + keep;
        if new_stop >= old_stop {
            return None;
        }
        match self.stop_at.compare_exchange(
            old_stop,
            new_stop,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Some(Task::new(new_stop, old_stop - new_stop)),
            Err(_) => None,
        }
    }
}

/// The downloader's map of worker id -> current active task.
/// Pause collection walks it to recover in-flight ranges.
#[derive(Default)]
pub struct ActiveSet {
    inner: RwLock<HashMap<usize, Arc<ActiveTask>>>,
}

impl ActiveSet {
    pub fn insert(&self, worker: usize, task: Arc<ActiveTask>) {
        self.inner.write().unwrap().insert(worker, task);
    }

    pub fn remove(&self, worker: usize) {
        self.inner.write().unwrap().remove(&worker);
    }

    pub fn snapshot(&self) -> Vec<Arc<ActiveTask>> {
        self.inner.read().unwrap().values().cloned().collect()
    }

    /// Still-owed ranges across all registered tasks.
    pub fn remaining_tasks(&self) -> Vec<Task> {
        self.inner
            .read()
            .unwrap()
            .values()
            .filter_map(|a| a.remaining_task())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active(task: Task) -> ActiveTask {
        ActiveTask::new(task, Instant::now(), CancelToken::new())
    }

    #[test]
    fn advance_moves_offset_and_tracks_remaining() {
        let a = active(Task::new(1000, 4000));
        assert_eq!(a.remaining(), 4000);
        a.advance(1500, 0.3);
        assert_eq!(a.current_offset(), 2500);
        assert_eq!(a.remaining(), 2500);
        assert_eq!(a.remaining_task(), Some(Task::new(2500, 2500)));
    }

    #[test]
    fn remaining_task_none_when_done() {
        let a = active(Task::new(0, 100));
        a.advance(100, 0.3);
        assert_eq!(a.remaining_task(), None);
    }

    #[test]
    fn steal_tail_halves_remaining_range() {
        let a = active(Task::new(0, 1 << 20));
        let stolen = a.steal_tail(64 * 1024).expect("steal should succeed");
        // Victim keeps the aligned front half, thief gets the rest.
        assert_eq!(a.stop_at(), 512 * 1024);
        assert_eq!(stolen, Task::new(512 * 1024, 512 * 1024));
        // Ranges stay contiguous and disjoint.
        assert_eq!(stolen.offset, a.stop_at());
        assert_eq!(stolen.end(), 1 << 20);
    }

    #[test]
    fn steal_tail_respects_min_chunk() {
        let a = active(Task::new(0, 100 * 1024));
        // Half of the remainder is below min_chunk: refuse.
        assert!(a.steal_tail(64 * 1024).is_none());
        assert_eq!(a.stop_at(), 100 * 1024);
    }

    #[test]
    fn steal_tail_accounts_for_progress() {
        let a = active(Task::new(0, 1 << 20));
        a.advance(512 * 1024, 0.3);
        let stolen = a.steal_tail(64 * 1024).unwrap();
        assert_eq!(stolen.offset, 512 * 1024 + 256 * 1024);
        assert_eq!(stolen.end(), 1 << 20);
        assert!(a.stop_at() > a.current_offset());
    }

    #[test]
    fn repeated_steals_stop_at_min_chunk() {
        let a = active(Task::new(0, 1 << 20));
        let mut pieces = Vec::new();
        while let Some(t) = a.steal_tail(64 * 1024) {
            pieces.push(t);
        }
        assert!(!pieces.is_empty());
        assert!(a.remaining() >= 64 * 1024);
        // Every stolen piece starts exactly where the previous boundary was.
        let mut end = 1 << 20;
        for p in pieces.iter() {
            assert_eq!(p.end(), end);
            end = p.offset;
        }
        assert_eq!(end, a.stop_at());
    }

    #[test]
    fn active_set_collects_remaining() {
        let set = ActiveSet::default();
        let a = Arc::new(active(Task::new(0, 100)));
        a.advance(40, 0.3);
        set.insert(0, a);
        set.insert(1, Arc::new(active(Task::new(100, 50))));
        let mut remaining = set.remaining_tasks();
        remaining.sort_by_key(|t| t.offset);
        assert_eq!(remaining, vec![Task::new(40, 60), Task::new(100, 50)]);
        set.remove(0);
        assert_eq!(set.len(), 1);
    }
}
