//! Condition-variable-guarded FIFO of byte-range tasks.
//!
//! Workers block in `pop` until a task arrives or the queue is closed; the
//! balancer splits the largest queued task when workers go idle; pause drains
//! the queue atomically so remaining ranges can be persisted.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::task::{align_down, Task};

#[derive(Default)]
struct Inner {
    tasks: VecDeque<Task>,
    closed: bool,
    idle: usize,
}

#[derive(Default)]
pub struct TaskQueue {
    inner: Mutex<Inner>,
    available: Condvar,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, task: Task) {
        self.inner.lock().unwrap().tasks.push_back(task);
        self.available.notify_one();
    }

    pub fn push_many(&self, tasks: impl IntoIterator<Item = Task>) {
        self.inner.lock().unwrap().tasks.extend(tasks);
        self.available.notify_all();
    }

    /// Blocks until a task is available or the queue is closed.
    /// Returns `None` iff the queue is closed and empty. While waiting the
    /// caller is counted in `idle_workers`.
    pub fn pop(&self) -> Option<Task> {
        let mut guard = self.inner.lock().unwrap();
        loop {
            if let Some(task) = guard.tasks.pop_front() {
                return Some(task);
            }
            if guard.closed {
                return None;
            }
            guard.idle += 1;
            guard = self.available.wait(guard).unwrap();
            guard.idle -= 1;
        }
    }

    /// After close, `pop` returns `None` once the queue empties. Idempotent.
    pub fn close(&self) {
        self.inner.lock().unwrap().closed = true;
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    /// Count of unread tasks.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Poppers currently blocked waiting for work.
    pub fn idle_workers(&self) -> usize {
        self.inner.lock().unwrap().idle
    }

    /// Atomically empties the queue and returns its contents (pause path).
    pub fn drain_remaining(&self) -> Vec<Task> {
        let mut guard = self.inner.lock().unwrap();
        std::mem::take(&mut guard.tasks).into()
    }

    /// Splits the largest queued task in two if its length exceeds
    /// `2 * min_chunk`, with the split point aligned down. The front half
    /// replaces the original in place; the back half is appended. Halves
    /// below `min_chunk` are never produced. Returns whether a split happened.
    pub fn split_largest(&self, min_chunk: u64) -> bool {
        let mut guard = self.inner.lock().unwrap();
        let Some(idx) = guard
            .tasks
            .iter()
            .enumerate()
            .max_by_key(|(_, t)| t.length)
            .map(|(i, _)| i)
        else {
            return false;
        };

        let task = guard.tasks[idx];
        if task.length <= 2 * min_chunk {
            return false;
        }
        let front = align_down(task.length / 2);
        if front < min_chunk || task.length - front < min_chunk {
            return false;
        }

        guard.tasks[idx] = Task::new(task.offset, front);
        guard
            .tasks
            .push_back(Task::new(task.offset + front, task.length - front));
        drop(guard);
        self.available.notify_all();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn push_pop_fifo() {
        let q = TaskQueue::new();
        q.push(Task::new(0, 10));
        q.push(Task::new(10, 10));
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop(), Some(Task::new(0, 10)));
        assert_eq!(q.pop(), Some(Task::new(10, 10)));
        assert!(q.is_empty());
    }

    #[test]
    fn pop_returns_none_when_closed_and_empty() {
        let q = TaskQueue::new();
        q.push(Task::new(0, 5));
        q.close();
        assert_eq!(q.pop(), Some(Task::new(0, 5)));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn pop_blocks_until_push() {
        let q = Arc::new(TaskQueue::new());
        let q2 = Arc::clone(&q);
        let handle = std::thread::spawn(move || q2.pop());

        // Wait until the popper is parked, then feed it.
        for _ in 0..100 {
            if q.idle_workers() == 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(q.idle_workers(), 1);
        q.push(Task::new(42, 1));
        assert_eq!(handle.join().unwrap(), Some(Task::new(42, 1)));
        assert_eq!(q.idle_workers(), 0);
    }

    #[test]
    fn close_wakes_blocked_poppers() {
        let q = Arc::new(TaskQueue::new());
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let q = Arc::clone(&q);
                std::thread::spawn(move || q.pop())
            })
            .collect();
        for _ in 0..100 {
            if q.idle_workers() == 3 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        q.close();
        for h in handles {
            assert_eq!(h.join().unwrap(), None);
        }
    }

    #[test]
    fn drain_remaining_empties_queue() {
        let q = TaskQueue::new();
        q.push_many([Task::new(0, 10), Task::new(10, 20)]);
        let drained = q.drain_remaining();
        assert_eq!(drained, vec![Task::new(0, 10), Task::new(10, 20)]);
        assert!(q.is_empty());
    }

    #[test]
    fn split_largest_replaces_in_place_and_appends() {
        let q = TaskQueue::new();
        q.push(Task::new(0, 4096));
        q.push(Task::new(4096, 65_536));
        assert!(q.split_largest(8192));
        let tasks = q.drain_remaining();
        assert_eq!(tasks[0], Task::new(0, 4096));
        assert_eq!(tasks[1], Task::new(4096, 32_768));
        assert_eq!(tasks[2], Task::new(4096 + 32_768, 32_768));
    }

    #[test]
    fn split_largest_respects_min_chunk() {
        let q = TaskQueue::new();
        q.push(Task::new(0, 100_000));
        // 100_000 <= 2 * 65_536, so no split.
        assert!(!q.split_largest(65_536));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn split_largest_on_empty_queue() {
        let q = TaskQueue::new();
        assert!(!q.split_largest(1024));
    }

    #[test]
    fn split_keeps_coverage_contiguous() {
        let q = TaskQueue::new();
        q.push(Task::new(0, 1_000_000));
        while q.split_largest(4096) {}
        let mut tasks = q.drain_remaining();
        tasks.sort_by_key(|t| t.offset);
        let mut offset = 0;
        for t in &tasks {
            assert_eq!(t.offset, offset);
            assert!(t.length >= 4096);
            offset = t.end();
        }
        assert_eq!(offset, 1_000_000);
    }
}
