//! One ranged GET streamed into the part file.
//!
//! The write callback re-reads `stop_at` before every write and clamps, so
//! a worker never writes past a boundary a work-stealer just lowered, and
//! the progress contribution is clamped the same way (no double-count).

use std::str;
use std::sync::Mutex;

use crate::cancel::CancelToken;
use crate::config::RuntimeConfig;
use crate::progress::ProgressState;
use crate::storage::PartFile;

use super::active::ActiveTask;

/// How a transfer ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FetchOutcome {
    /// Reached `stop_at` (or EOF on an open-ended range).
    Done,
    /// A stealer lowered `stop_at` below our position; the rest of the
    /// range belongs to someone else now.
    Stolen,
    /// The per-task context was cancelled (health preemption).
    TaskCancelled,
    /// The session context was cancelled (pause/shutdown).
    SessionCancelled,
}

/// Error of a single transfer attempt, classified for retry decisions.
#[derive(Debug, thiserror::Error)]
pub(crate) enum FetchError {
    #[error("{0}")]
    Curl(#[source] curl::Error),
    #[error("HTTP {0}")]
    Http(u32),
    #[error("rate limited (HTTP 429)")]
    RateLimited { retry_after: Option<String> },
    #[error("partial transfer: expected {expected} bytes, got {received}")]
    Partial { expected: u64, received: u64 },
    #[error("storage: {0}")]
    Storage(#[source] std::io::Error),
}

impl FetchError {
    /// Whether another attempt could plausibly succeed. Disk errors are
    /// fatal; rate limiting is handled by the limiter, not retried here.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Curl(e) => {
                e.is_operation_timedout()
                    || e.is_couldnt_connect()
                    || e.is_couldnt_resolve_host()
                    || e.is_recv_error()
                    || e.is_send_error()
                    || e.is_got_nothing()
                    || e.is_partial_file()
            }
            FetchError::Http(code) => (500..=599).contains(code),
            FetchError::Partial { .. } => true,
            FetchError::RateLimited { .. } | FetchError::Storage(_) => false,
        }
    }
}

/// Why the write callback aborted the transfer early.
enum Abort {
    Stolen,
    TaskCancelled,
    SessionCancelled,
    Storage(std::io::Error),
    FullResponseRejected,
}

/// Streams `active`'s range into `file`. A 200 response is accepted only
/// when `allow_full` and the range starts at 0 (single-connection
/// fallback); otherwise only 206.
pub(crate) fn fetch_range(
    url: &str,
    cfg: &RuntimeConfig,
    active: &ActiveTask,
    file: &PartFile,
    state: &ProgressState,
    session: &CancelToken,
    allow_full: bool,
) -> Result<FetchOutcome, FetchError> {
    let task = active.task();
    let start = active.current_offset();
    let open_ended = active.stop_at() == u64::MAX;
    let task_cancel = active.cancel_handle();

    let status = Mutex::new(0u32);
    let retry_after: Mutex<Option<String>> = Mutex::new(None);
    let abort: Mutex<Option<Abort>> = Mutex::new(None);

    let mut easy = curl::easy::Easy::new();
    easy.url(url).map_err(FetchError::Curl)?;
    easy.useragent(&cfg.user_agent).map_err(FetchError::Curl)?;
    // HTTP/1.1 so N workers actually open N TCP connections.
    easy.http_version(curl::easy::HttpVersion::V11)
        .map_err(FetchError::Curl)?;
    easy.follow_location(true).map_err(FetchError::Curl)?;
    easy.max_redirections(10).map_err(FetchError::Curl)?;
    easy.connect_timeout(cfg.connect_deadline())
        .map_err(FetchError::Curl)?;
    // Backstop under the health monitor: kill transfers crawling below
    // 1 KiB/s for twice the stall timeout.
    easy.low_speed_limit(1024).map_err(FetchError::Curl)?;
    easy.low_speed_time(cfg.stall() * 2).map_err(FetchError::Curl)?;
    easy.buffer_size(cfg.worker_buffer_size)
        .map_err(FetchError::Curl)?;
    if open_ended {
        if start > 0 {
            easy.range(&format!("{start}-")).map_err(FetchError::Curl)?;
        }
    } else {
        easy.range(&format!("{}-{}", start, task.end() - 1))
            .map_err(FetchError::Curl)?;
    }

    let perform_result = {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|data| {
                let Ok(line) = str::from_utf8(data) else {
                    return true;
                };
                let line = line.trim();
                if line.starts_with("HTTP/") {
                    if let Some(code) = line.split_whitespace().nth(1) {
                        if let Ok(code) = code.parse::<u32>() {
                            *status.lock().unwrap() = code;
                        }
                    }
                } else if let Some((name, value)) = line.split_once(':') {
                    if name.trim().eq_ignore_ascii_case("retry-after") {
                        *retry_after.lock().unwrap() = Some(value.trim().to_string());
                    }
                }
                true
            })
            .map_err(FetchError::Curl)?;

        transfer
            .write_function(|data| {
                let stop = |reason: Abort| -> Result<usize, curl::easy::WriteError> {
                    *abort.lock().unwrap() = Some(reason);
                    Ok(0)
                };
                if session.is_cancelled() {
                    return stop(Abort::SessionCancelled);
                }
                if task_cancel.is_cancelled_directly() {
                    return stop(Abort::TaskCancelled);
                }

                let code = *status.lock().unwrap();
                if code != 200 && code != 206 {
                    // Swallow error bodies (429 pages etc.); the status is
                    // handled after perform.
                    return Ok(data.len());
                }
                if code == 200 && (!allow_full || task.offset != 0) {
                    return stop(Abort::FullResponseRejected);
                }

                let offset = active.current_offset();
                let stop_at = active.stop_at();
                if offset >= stop_at {
                    return stop(Abort::Stolen);
                }
                let take = (data.len() as u64).min(stop_at - offset) as usize;
                if let Err(e) = file.write_at(offset, &data[..take]) {
                    return stop(Abort::Storage(e));
                }
                active.advance(take as u64, cfg.speed_ema_alpha);
                state.add_downloaded(take as u64);

                if take < data.len() {
                    // Short count aborts: the rest of the buffer belongs to
                    // the stolen range.
                    *abort.lock().unwrap() = Some(Abort::Stolen);
                    return Ok(take);
                }
                Ok(data.len())
            })
            .map_err(FetchError::Curl)?;

        transfer.perform()
    };

    let code = *status.lock().unwrap();
    let aborted = abort.into_inner().unwrap();

    if let Err(e) = perform_result {
        return match aborted {
            Some(Abort::Stolen) => Ok(FetchOutcome::Stolen),
            Some(Abort::TaskCancelled) => Ok(FetchOutcome::TaskCancelled),
            Some(Abort::SessionCancelled) => Ok(FetchOutcome::SessionCancelled),
            Some(Abort::Storage(io)) => Err(FetchError::Storage(io)),
            Some(Abort::FullResponseRejected) => Err(FetchError::Http(200)),
            None => Err(FetchError::Curl(e)),
        };
    }

    match code {
        429 => {
            return Err(FetchError::RateLimited {
                retry_after: retry_after.into_inner().unwrap(),
            })
        }
        200 | 206 => {}
        other => return Err(FetchError::Http(other)),
    }

    let offset = active.current_offset();
    let stop_at = active.stop_at();
    if open_ended || offset >= stop_at {
        return Ok(FetchOutcome::Done);
    }
    Err(FetchError::Partial {
        expected: stop_at.saturating_sub(start),
        received: offset.saturating_sub(start),
    })
}
