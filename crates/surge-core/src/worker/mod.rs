//! Download worker: pops tasks, streams ranges, survives trouble.
//!
//! A worker owns one connection slot. Per task it registers an
//! [`ActiveTask`] keyed by its worker id, honors the host rate limiter,
//! retries transient failures with exponential backoff, and requeues what
//! it could not finish. Only disk errors are fatal; pause/shutdown leaves
//! the active entry in place for the pause collector.

mod active;
mod transfer;

pub use active::{ActiveSet, ActiveTask, SPEED_WINDOW};

pub(crate) use transfer::{fetch_range, FetchError, FetchOutcome};

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::config::RuntimeConfig;
use crate::error::DownloadError;
use crate::progress::ProgressState;
use crate::queue::TaskQueue;
use crate::rate_limit::HostLimiter;
use crate::storage::PartFile;

const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

/// Everything one worker needs, shared with its siblings.
pub(crate) struct WorkerCtx {
    pub id: usize,
    pub url: String,
    pub cfg: Arc<RuntimeConfig>,
    pub queue: Arc<TaskQueue>,
    pub active: Arc<ActiveSet>,
    pub state: Arc<ProgressState>,
    pub file: PartFile,
    pub limiter: Arc<HostLimiter>,
    pub session: CancelToken,
    pub epoch: Instant,
    /// Whether a 200 whole-file response is acceptable (single-connection
    /// fallback only).
    pub allow_full_response: bool,
}

/// How a worker's life ended.
pub(crate) enum WorkerOutcome {
    /// Queue closed and drained; nothing left to do.
    Finished,
    /// Session cancelled (pause or shutdown); active entry left registered.
    SessionCancelled,
    /// Unrecoverable error (disk).
    Fatal(DownloadError),
}

/// Exponential backoff before retry `attempt` (1-based).
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    let factor = 1u32 << attempt.min(7);
    (RETRY_BASE_DELAY * factor).min(RETRY_MAX_DELAY)
}

pub(crate) fn run(ctx: WorkerCtx) -> WorkerOutcome {
    ctx.state.worker_started();
    let outcome = run_inner(&ctx);
    ctx.state.worker_finished();
    outcome
}

fn run_inner(ctx: &WorkerCtx) -> WorkerOutcome {
    'tasks: while let Some(popped) = ctx.queue.pop() {
        if ctx.session.is_cancelled() {
            // Hand the task back so the pause collector sees it.
            ctx.queue.push(popped);
            return WorkerOutcome::SessionCancelled;
        }

        let mut task = popped;
        let mut attempt = 0u32;
        loop {
            if attempt > 0 {
                std::thread::sleep(backoff_delay(attempt));
            }

            let task_ctx = ctx.session.child();
            let active = Arc::new(ActiveTask::new(task, ctx.epoch, task_ctx));
            ctx.active.insert(ctx.id, Arc::clone(&active));

            ctx.limiter.wait_if_blocked();
            if ctx.session.is_cancelled() {
                // The registered entry carries the un-downloaded range.
                return WorkerOutcome::SessionCancelled;
            }

            let result = fetch_range(
                &ctx.url,
                &ctx.cfg,
                &active,
                &ctx.file,
                &ctx.state,
                &ctx.session,
                ctx.allow_full_response,
            );

            match result {
                Ok(FetchOutcome::Done) | Ok(FetchOutcome::Stolen) => {
                    ctx.limiter.report_success();
                    ctx.active.remove(ctx.id);
                    continue 'tasks;
                }
                Ok(FetchOutcome::SessionCancelled) => {
                    return WorkerOutcome::SessionCancelled;
                }
                Ok(FetchOutcome::TaskCancelled) => {
                    // Health monitor preempted us; give the rest back and
                    // move on. The original attempt is not retried.
                    if let Some(rest) = active.remaining_task() {
                        tracing::debug!(
                            worker = ctx.id,
                            offset = rest.offset,
                            len = rest.length,
                            "task preempted, requeueing remainder"
                        );
                        ctx.queue.push(rest);
                    }
                    ctx.active.remove(ctx.id);
                    continue 'tasks;
                }
                Err(FetchError::RateLimited { retry_after }) => {
                    let wait = ctx.limiter.handle_429(retry_after.as_deref());
                    tracing::debug!(
                        worker = ctx.id,
                        wait_ms = wait.as_millis() as u64,
                        "rate limited, requeueing task"
                    );
                    if let Some(rest) = active.remaining_task() {
                        ctx.queue.push(rest);
                    }
                    ctx.active.remove(ctx.id);
                    continue 'tasks;
                }
                Err(FetchError::Storage(e)) => {
                    ctx.active.remove(ctx.id);
                    return WorkerOutcome::Fatal(DownloadError::WriteFailed(e));
                }
                Err(e) => {
                    // Shrink to the remaining suffix so a retry never
                    // recounts bytes already written.
                    let rest = active.remaining_task();
                    ctx.active.remove(ctx.id);
                    let Some(rest) = rest else {
                        continue 'tasks;
                    };
                    task = rest;
                    attempt += 1;
                    if !e.is_transient() || attempt >= ctx.cfg.max_task_retries {
                        tracing::warn!(
                            worker = ctx.id,
                            offset = task.offset,
                            len = task.length,
                            attempts = attempt,
                            error = %e,
                            "task failed, requeueing for another worker"
                        );
                        ctx.queue.push(task);
                        continue 'tasks;
                    }
                    tracing::debug!(worker = ctx.id, attempt, error = %e, "retrying task");
                }
            }
        }
    }
    WorkerOutcome::Finished
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_millis(500));
        assert_eq!(backoff_delay(2), Duration::from_secs(1));
        assert_eq!(backoff_delay(3), Duration::from_secs(2));
        assert!(backoff_delay(20) <= RETRY_MAX_DELAY);
        let mut prev = Duration::ZERO;
        for attempt in 1..10 {
            let d = backoff_delay(attempt);
            assert!(d >= prev);
            prev = d;
        }
    }
}
