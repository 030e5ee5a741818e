//! Orchestration of one download.
//!
//! Given a probed URL and destination, picks a connection count from the
//! file size, plans the task queue, spawns N workers plus the balancer,
//! completion and health monitors, and handles the pause / cancel /
//! complete endgames. Servers without range support (and small files) go
//! through the linear single-stream path instead.

mod balance;
mod budget;
mod monitor;
mod single;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::cancel::CancelToken;
use crate::config::RuntimeConfig;
use crate::error::DownloadError;
use crate::probe::ProbeResult;
use crate::progress::ProgressState;
use crate::queue::TaskQueue;
use crate::rate_limit::RateLimiters;
use crate::storage::PartFile;
use crate::store::{
    url_hash, BlockingStore, DownloadEntry, DownloadStatus, SavedDownload, StoreError,
};
use crate::task::make_tasks;
use crate::worker::{self, ActiveSet, WorkerCtx, WorkerOutcome};

pub struct Engine {
    cfg: Arc<RuntimeConfig>,
    store: BlockingStore,
    budget: Arc<budget::ConnectionBudget>,
}

impl Engine {
    pub fn new(cfg: RuntimeConfig, store: BlockingStore) -> Self {
        let cfg = cfg.normalized();
        let budget = Arc::new(budget::ConnectionBudget::new(cfg.max_global_connections));
        Self {
            cfg: Arc::new(cfg),
            store,
            budget,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.cfg
    }

    pub fn store(&self) -> &BlockingStore {
        &self.store
    }

    /// Runs one download to its end state. `Ok(())` means the destination
    /// file exists and durable state reflects completion; `Err(Paused)` and
    /// `Err(Cancelled)` are the interruption sentinels.
    pub fn download(
        &self,
        url: &str,
        dest_path: &Path,
        probe: &ProbeResult,
        state: &Arc<ProgressState>,
        connections: Option<usize>,
    ) -> Result<(), DownloadError> {
        let session = CancelToken::new();
        state.install_cancel(session.clone());
        if state.is_paused() {
            // A pause raced ahead of this session's cancel handle.
            session.cancel();
        }

        let file_size = probe.file_size;
        let wanted = connections
            .unwrap_or_else(|| self.cfg.connections_for(file_size))
            .clamp(1, self.cfg.max_connections_per_host);

        if !probe.supports_range || file_size == 0 || wanted == 1 {
            let _lease = budget::BudgetLease::acquire(&self.budget, 1);
            return single::run(self, url, dest_path, probe, state, &session);
        }

        let lease = budget::BudgetLease::acquire(&self.budget, wanted);
        let n = lease.connections();
        self.download_concurrent(url, dest_path, file_size, state, &session, n)
    }

    fn download_concurrent(
        &self,
        url: &str,
        dest_path: &Path,
        file_size: u64,
        state: &Arc<ProgressState>,
        session: &CancelToken,
        n: usize,
    ) -> Result<(), DownloadError> {
        let chunk = self.cfg.chunk_size(file_size, n);
        let file = PartFile::open(dest_path).map_err(DownloadError::WriteFailed)?;

        // Saved ranges only make sense against the part file they were cut
        // from; a missing or resized file forces a fresh start.
        let saved = match self.resumable_state(url, dest_path)? {
            Some(s) if file.len().map(|l| l == file_size).unwrap_or(false) => Some(s),
            _ => None,
        };
        state.set_total(file_size)?;
        let (tasks, created_at) = match &saved {
            Some(s) => {
                state.set_downloaded(s.entry.downloaded);
                state.set_saved_elapsed(std::time::Duration::from_millis(s.entry.time_taken_ms));
                tracing::info!(
                    url,
                    downloaded = s.entry.downloaded,
                    tasks = s.tasks.len(),
                    "resuming download"
                );
                (s.tasks.clone(), s.entry.created_at)
            }
            None => {
                state.set_downloaded(0);
                state.set_saved_elapsed(std::time::Duration::ZERO);
                file.allocate(file_size).map_err(DownloadError::WriteFailed)?;
                tracing::info!(url, size = file_size, workers = n, chunk, "starting download");
                (
                    make_tasks(file_size, chunk),
                    crate::store::unix_timestamp(),
                )
            }
        };
        state.sync_session_start();

        let queue = Arc::new(TaskQueue::new());
        queue.push_many(tasks);
        let active = Arc::new(ActiveSet::default());
        let limiter = RateLimiters::global().for_url(url)?;
        let epoch = Instant::now();
        let monitors_stop = session.child();

        let mut workers = Vec::with_capacity(n);
        for id in 0..n {
            let ctx = WorkerCtx {
                id,
                url: url.to_string(),
                cfg: Arc::clone(&self.cfg),
                queue: Arc::clone(&queue),
                active: Arc::clone(&active),
                state: Arc::clone(state),
                file: file.clone(),
                limiter: Arc::clone(&limiter),
                session: session.clone(),
                epoch,
                allow_full_response: false,
            };
            workers.push(std::thread::spawn(move || worker::run(ctx)));
        }

        let balancer = {
            let queue = Arc::clone(&queue);
            let active = Arc::clone(&active);
            let stop = monitors_stop.clone();
            let min_chunk = self.cfg.min_chunk_size;
            std::thread::spawn(move || balance::run_balancer(&queue, &active, &stop, min_chunk))
        };
        let completion = {
            let queue = Arc::clone(&queue);
            let state = Arc::clone(state);
            let stop = monitors_stop.clone();
            std::thread::spawn(move || monitor::run_completion(&queue, &state, &stop, file_size))
        };
        let health = {
            let active = Arc::clone(&active);
            let stop = monitors_stop.clone();
            let cfg = Arc::clone(&self.cfg);
            std::thread::spawn(move || monitor::run_health(&active, &stop, &cfg))
        };

        let mut fatal: Option<DownloadError> = None;
        for handle in workers {
            match handle.join() {
                Ok(WorkerOutcome::Finished) | Ok(WorkerOutcome::SessionCancelled) => {}
                Ok(WorkerOutcome::Fatal(e)) => {
                    tracing::error!(url, error = %e, "worker failed fatally");
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                    // Stop the rest of the session; the download cannot
                    // finish with a broken file.
                    session.cancel();
                }
                Err(_) => {
                    if fatal.is_none() {
                        fatal = Some(DownloadError::Other(anyhow::anyhow!("worker panicked")));
                    }
                    session.cancel();
                }
            }
        }
        monitors_stop.cancel();
        queue.close();
        let _ = balancer.join();
        let _ = completion.join();
        let _ = health.join();

        if state.is_paused() {
            return self.save_paused(
                url, dest_path, file_size, state, &queue, &active, created_at,
            );
        }
        if let Some(e) = fatal {
            return Err(e);
        }
        if session.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        file.sync().map_err(DownloadError::WriteFailed)?;
        file.finalize(dest_path, file_size)
            .map_err(DownloadError::WriteFailed)?;
        self.record_completed(url, dest_path, file_size, state, created_at)?;
        state.mark_done();
        tracing::info!(url, size = file_size, "download complete");
        Ok(())
    }

    /// Paused state usable for resume: saved tasks present and progress
    /// made. Anything else means a fresh start.
    fn resumable_state(
        &self,
        url: &str,
        dest_path: &Path,
    ) -> Result<Option<SavedDownload>, DownloadError> {
        match self.store.load_by_path(url, dest_path) {
            Ok(s) if !s.tasks.is_empty() && s.entry.downloaded > 0 => Ok(Some(s)),
            Ok(_) => Ok(None),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save_paused(
        &self,
        url: &str,
        dest_path: &Path,
        file_size: u64,
        state: &Arc<ProgressState>,
        queue: &TaskQueue,
        active: &ActiveSet,
        created_at: i64,
    ) -> Result<(), DownloadError> {
        let mut remaining = queue.drain_remaining();
        remaining.extend(active.remaining_tasks());
        remaining.sort_by_key(|t| t.offset);

        let remaining_bytes: u64 = remaining.iter().map(|t| t.length).sum();
        let downloaded = file_size.saturating_sub(remaining_bytes);
        state.set_downloaded(downloaded);

        let entry = DownloadEntry {
            id: state.id(),
            url: url.to_string(),
            dest_path: dest_path.to_path_buf(),
            filename: file_name_of(dest_path),
            status: DownloadStatus::Paused,
            total_size: file_size,
            downloaded,
            url_hash: url_hash(url),
            created_at,
            paused_at: Some(crate::store::unix_timestamp()),
            completed_at: None,
            time_taken_ms: state.elapsed().as_millis() as u64,
        };
        self.store.save(&entry, &remaining)?;
        tracing::info!(
            url,
            downloaded,
            remaining = remaining.len(),
            "paused, state persisted"
        );
        Err(DownloadError::Paused)
    }

    fn record_completed(
        &self,
        url: &str,
        dest_path: &Path,
        total: u64,
        state: &Arc<ProgressState>,
        created_at: i64,
    ) -> Result<(), DownloadError> {
        let entry = DownloadEntry {
            id: state.id(),
            url: url.to_string(),
            dest_path: dest_path.to_path_buf(),
            filename: file_name_of(dest_path),
            status: DownloadStatus::Completed,
            total_size: total,
            downloaded: total,
            url_hash: url_hash(url),
            created_at,
            paused_at: None,
            completed_at: Some(crate::store::unix_timestamp()),
            time_taken_ms: state.elapsed().as_millis() as u64,
        };
        // Saving with no tasks clears any leftover resume ranges.
        self.store.save(&entry, &[])?;
        Ok(())
    }
}

fn file_name_of(dest_path: &Path) -> String {
    dest_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
