//! Completion and worker-health monitors.

use std::time::Duration;

use crate::cancel::CancelToken;
use crate::config::RuntimeConfig;
use crate::progress::ProgressState;
use crate::queue::TaskQueue;
use crate::worker::ActiveSet;

const COMPLETION_INTERVAL: Duration = Duration::from_millis(500);
const HEALTH_INTERVAL: Duration = Duration::from_secs(2);

/// Closes the queue once the download cannot make further progress through
/// it: every live worker is idle with nothing queued, or all bytes are in.
/// Also closes on session cancel so blocked poppers wake up.
pub(super) fn run_completion(
    queue: &TaskQueue,
    state: &ProgressState,
    stop: &CancelToken,
    file_size: u64,
) {
    loop {
        if stop.is_cancelled() {
            queue.close();
            return;
        }
        if queue.is_empty() {
            let live = state.active_workers();
            if queue.idle_workers() >= live || state.downloaded() >= file_size {
                queue.close();
                return;
            }
        }
        std::thread::sleep(COMPLETION_INTERVAL);
    }
}

/// Preempts unhealthy tasks: anything stalled past the stall timeout, and
/// anything slower than `threshold * mean` of its mature peers. Preemption
/// cancels only the per-task context; the worker requeues the remainder and
/// moves on.
pub(super) fn run_health(active: &ActiveSet, stop: &CancelToken, cfg: &RuntimeConfig) {
    let grace = cfg.grace_period();
    let stall = cfg.stall();
    let threshold = cfg.slow_worker_threshold;

    while !stop.is_cancelled() {
        std::thread::sleep(HEALTH_INTERVAL);
        if stop.is_cancelled() {
            return;
        }

        let snapshot = active.snapshot();
        let mature: Vec<_> = snapshot.iter().filter(|a| a.age() > grace).collect();
        if mature.is_empty() {
            continue;
        }

        for task in &mature {
            if task.idle_for() > stall && !task.cancel_handle().is_cancelled() {
                tracing::warn!(
                    offset = task.current_offset(),
                    idle_secs = task.idle_for().as_secs(),
                    "stalled task preempted"
                );
                task.cancel_handle().cancel();
            }
        }

        let speeds: Vec<f64> = mature.iter().map(|a| a.speed()).filter(|s| *s > 0.0).collect();
        if speeds.len() < 2 {
            continue;
        }
        let mean = speeds.iter().sum::<f64>() / speeds.len() as f64;
        if mean <= 0.0 {
            continue;
        }
        for task in &mature {
            let speed = task.speed();
            if speed > 0.0 && speed < threshold * mean && !task.cancel_handle().is_cancelled() {
                tracing::debug!(
                    offset = task.current_offset(),
                    speed,
                    mean,
                    "slow task preempted"
                );
                task.cancel_handle().cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use crate::worker::ActiveTask;
    use std::sync::Arc;
    use std::time::Instant;
    use uuid::Uuid;

    #[test]
    fn completion_closes_when_all_live_workers_idle() {
        let queue = Arc::new(TaskQueue::new());
        let state = Arc::new(ProgressState::new(Uuid::new_v4()));
        let stop = CancelToken::new();
        // No workers alive, queue empty: closes immediately.
        run_completion(&queue, &state, &stop, 100);
        assert!(queue.is_closed());
    }

    #[test]
    fn completion_closes_when_bytes_complete() {
        let queue = Arc::new(TaskQueue::new());
        let state = Arc::new(ProgressState::new(Uuid::new_v4()));
        state.worker_started();
        state.add_downloaded(100);
        let stop = CancelToken::new();
        run_completion(&queue, &state, &stop, 100);
        assert!(queue.is_closed());
    }

    #[test]
    fn completion_closes_on_cancel_even_with_queued_tasks() {
        let queue = Arc::new(TaskQueue::new());
        queue.push(Task::new(0, 10));
        let state = Arc::new(ProgressState::new(Uuid::new_v4()));
        let stop = CancelToken::new();
        stop.cancel();
        run_completion(&queue, &state, &stop, 100);
        assert!(queue.is_closed());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn health_ignores_tasks_inside_grace_period() {
        let cfg = RuntimeConfig::default().normalized();
        let active = ActiveSet::default();
        let task = Arc::new(ActiveTask::new(
            Task::new(0, 1 << 20),
            Instant::now(),
            CancelToken::new(),
        ));
        active.insert(0, Arc::clone(&task));
        let stop = CancelToken::new();
        stop.cancel();
        run_health(&active, &stop, &cfg);
        assert!(!task.cancel_handle().is_cancelled());
    }
}
