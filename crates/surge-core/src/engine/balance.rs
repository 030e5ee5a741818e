//! Load balancing: queued-task splitting and work stealing.

use std::time::Duration;

use crate::cancel::CancelToken;
use crate::queue::TaskQueue;
use crate::task::Task;
use crate::worker::ActiveSet;

const BALANCE_INTERVAL: Duration = Duration::from_millis(500);
/// Splitting is cheap but not free; bound the total to keep task counts sane.
const MAX_SPLITS: u32 = 50;

/// Every 500 ms: while workers sit idle, split the largest queued task so
/// they have something to chew on; once the queue is dry, steal the tail of
/// the largest in-flight range instead.
pub(super) fn run_balancer(
    queue: &TaskQueue,
    active: &ActiveSet,
    stop: &CancelToken,
    min_chunk: u64,
) {
    let mut splits = 0u32;
    loop {
        std::thread::sleep(BALANCE_INTERVAL);
        if stop.is_cancelled() || queue.is_closed() {
            return;
        }
        if queue.idle_workers() == 0 {
            continue;
        }
        if splits < MAX_SPLITS && queue.split_largest(min_chunk) {
            splits += 1;
            tracing::trace!(splits, "split largest queued task");
            continue;
        }
        if queue.is_empty() {
            if let Some(stolen) = steal_largest(active, min_chunk) {
                tracing::debug!(
                    offset = stolen.offset,
                    len = stolen.length,
                    "stole tail of slowest range"
                );
                queue.push(stolen);
            }
        }
    }
}

/// Picks the active task with the most bytes left and takes its back half.
fn steal_largest(active: &ActiveSet, min_chunk: u64) -> Option<Task> {
    let snapshot = active.snapshot();
    let victim = snapshot
        .iter()
        .max_by_key(|a| a.remaining())
        .filter(|a| a.remaining() > min_chunk)?;
    victim.steal_tail(min_chunk)
}
