//! Single-stream fallback downloader.
//!
//! Used when the server ignores byte ranges, when the size is unknown, or
//! when the file is small enough that one connection wins. Linear copy of
//! the body with positional writes; resume picks up at the saved offset
//! via a `Range` request when the server supports it.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::cancel::CancelToken;
use crate::error::DownloadError;
use crate::probe::ProbeResult;
use crate::progress::ProgressState;
use crate::rate_limit::RateLimiters;
use crate::storage::PartFile;
use crate::store::{url_hash, DownloadEntry, DownloadStatus, StoreError};
use crate::task::Task;
use crate::worker::{self, ActiveTask, FetchError, FetchOutcome};

use super::{file_name_of, Engine};

pub(super) fn run(
    engine: &Engine,
    url: &str,
    dest_path: &Path,
    probe: &ProbeResult,
    state: &Arc<ProgressState>,
    session: &CancelToken,
) -> Result<(), DownloadError> {
    let cfg = engine.config();
    let file_size = probe.file_size;
    let file = PartFile::open(dest_path).map_err(DownloadError::WriteFailed)?;

    // Resume only a contiguous tail against an intact part file; anything
    // else re-downloads.
    let file_intact = file.len().map(|l| l == file_size).unwrap_or(false);
    let saved = if probe.supports_range && file_size > 0 && file_intact {
        match engine.store().load_by_path(url, dest_path) {
            Ok(s)
                if s.entry.downloaded > 0
                    && s.tasks.len() == 1
                    && s.tasks[0].end() == file_size =>
            {
                Some(s)
            }
            Ok(_) => None,
            Err(StoreError::NotFound) => None,
            Err(e) => return Err(e.into()),
        }
    } else {
        None
    };

    state.set_total(file_size)?;
    let (start, created_at) = match &saved {
        Some(s) => {
            let start = s.tasks[0].offset;
            state.set_downloaded(start);
            state.set_saved_elapsed(std::time::Duration::from_millis(s.entry.time_taken_ms));
            tracing::info!(url, offset = start, "resuming single-stream download");
            (start, s.entry.created_at)
        }
        None => {
            if file_size > 0 {
                file.allocate(file_size).map_err(DownloadError::WriteFailed)?;
            }
            state.set_downloaded(0);
            state.set_saved_elapsed(std::time::Duration::ZERO);
            tracing::info!(url, size = file_size, "starting single-stream download");
            (0, crate::store::unix_timestamp())
        }
    };
    state.sync_session_start();

    let limiter = RateLimiters::global().for_url(url)?;
    let epoch = Instant::now();

    state.worker_started();
    let result = stream(
        engine, url, &file, state, session, &limiter, epoch, file_size, start,
    );
    state.worker_finished();

    let written = match result {
        Ok(written) => written,
        Err(StreamStop::Interrupted { at }) => {
            if state.is_paused() && file_size > 0 {
                let remaining = if at < file_size {
                    vec![Task::new(at, file_size - at)]
                } else {
                    Vec::new()
                };
                state.set_downloaded(at);
                let entry = DownloadEntry {
                    id: state.id(),
                    url: url.to_string(),
                    dest_path: dest_path.to_path_buf(),
                    filename: file_name_of(dest_path),
                    status: DownloadStatus::Paused,
                    total_size: file_size,
                    downloaded: at,
                    url_hash: url_hash(url),
                    created_at,
                    paused_at: Some(crate::store::unix_timestamp()),
                    completed_at: None,
                    time_taken_ms: state.elapsed().as_millis() as u64,
                };
                engine.store().save(&entry, &remaining)?;
                tracing::info!(url, downloaded = at, "paused, state persisted");
                return Err(DownloadError::Paused);
            }
            return Err(if state.is_paused() {
                DownloadError::Paused
            } else {
                DownloadError::Cancelled
            });
        }
        Err(StreamStop::Failed(e)) => return Err(e),
    };

    let total = if file_size > 0 { file_size } else { written };
    file.sync().map_err(DownloadError::WriteFailed)?;
    file.finalize(dest_path, total)
        .map_err(DownloadError::WriteFailed)?;
    engine.record_completed(url, dest_path, total, state, created_at)?;
    state.mark_done();
    tracing::info!(url, size = total, "download complete");
    Ok(())
}

enum StreamStop {
    /// Session cancelled; `at` is the contiguous high-water offset.
    Interrupted { at: u64 },
    Failed(DownloadError),
}

/// The retry loop around the linear body copy. Returns bytes written.
#[allow(clippy::too_many_arguments)]
fn stream(
    engine: &Engine,
    url: &str,
    file: &PartFile,
    state: &Arc<ProgressState>,
    session: &CancelToken,
    limiter: &crate::rate_limit::HostLimiter,
    epoch: Instant,
    file_size: u64,
    mut offset: u64,
) -> Result<u64, StreamStop> {
    let cfg = engine.config();
    let end = if file_size > 0 { file_size } else { u64::MAX };
    let mut attempt = 0u32;

    loop {
        if session.is_cancelled() {
            return Err(StreamStop::Interrupted { at: offset });
        }
        if attempt > 0 {
            std::thread::sleep(worker::backoff_delay(attempt));
        }

        let active = ActiveTask::new(
            Task::new(offset, end - offset),
            epoch,
            session.child(),
        );
        limiter.wait_if_blocked();
        if session.is_cancelled() {
            return Err(StreamStop::Interrupted { at: offset });
        }

        let outcome = worker::fetch_range(url, cfg, &active, file, state, session, true);
        offset = active.current_offset();

        match outcome {
            Ok(FetchOutcome::Done) => {
                limiter.report_success();
                return Ok(offset);
            }
            Ok(FetchOutcome::SessionCancelled) => {
                return Err(StreamStop::Interrupted { at: offset });
            }
            Ok(FetchOutcome::Stolen) | Ok(FetchOutcome::TaskCancelled) => {
                // No stealers or health monitor here; just try again.
                attempt += 1;
            }
            Err(FetchError::RateLimited { retry_after }) => {
                limiter.handle_429(retry_after.as_deref());
            }
            Err(FetchError::Storage(e)) => {
                return Err(StreamStop::Failed(DownloadError::WriteFailed(e)));
            }
            Err(FetchError::Http(200)) if offset > 0 => {
                // Server ignored our resume range and restarted from zero.
                tracing::debug!(url, "server ignored resume range, restarting from 0");
                offset = 0;
                state.set_downloaded(0);
                state.sync_session_start();
                attempt += 1;
            }
            Err(e) => {
                attempt += 1;
                if !e.is_transient() || attempt >= cfg.max_task_retries {
                    return Err(StreamStop::Failed(match e {
                        FetchError::Http(code) => DownloadError::UnexpectedStatus(code),
                        other => DownloadError::ReadFailed(other.to_string()),
                    }));
                }
                tracing::debug!(url, attempt, error = %e, "retrying single-stream download");
            }
        }
    }
}
