//! Bounded scheduler of concurrent downloads.
//!
//! Up to K pool workers pop queued requests and drive them through the
//! engine. Pause keeps a download in the active map (resume requeues it);
//! cancel drops it and its durable state; `graceful_shutdown` pauses
//! everything and joins the workers so in-flight saves commit before the
//! process exits.

mod poller;
mod request;

pub use request::DownloadRequest;

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::JoinHandle;

use crate::config::RuntimeConfig;
use crate::engine::Engine;
use crate::error::DownloadError;
use crate::events::{Event, EventBus};
use crate::probe;
use crate::progress::ProgressState;
use crate::store::{BlockingStore, DownloadEntry, DownloadId, DownloadStatus, StoreError};

/// Observable status of a pool entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
    Queued,
    Downloading,
    Paused,
    Completed,
    Error,
}

impl PoolStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PoolStatus::Queued => "queued",
            PoolStatus::Downloading => "downloading",
            PoolStatus::Paused => "paused",
            PoolStatus::Completed => "completed",
            PoolStatus::Error => "error",
        }
    }
}

/// Point-in-time view of one download, for `get_status` / `list`.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub id: DownloadId,
    pub url: String,
    pub filename: Option<String>,
    pub status: PoolStatus,
    pub downloaded: u64,
    pub total: u64,
    /// Fraction complete in [0.0, 1.0].
    pub progress: f64,
    /// Session speed, bytes/sec.
    pub speed: f64,
    pub active_connections: usize,
}

struct Job {
    request: DownloadRequest,
    is_resume: bool,
}

#[derive(Default)]
struct JobQueueInner {
    jobs: VecDeque<Job>,
    closed: bool,
}

/// Condvar queue feeding the K pool workers.
#[derive(Default)]
struct JobQueue {
    inner: Mutex<JobQueueInner>,
    available: Condvar,
}

impl JobQueue {
    fn push(&self, job: Job) {
        let mut guard = self.inner.lock().unwrap();
        if guard.closed {
            return;
        }
        guard.jobs.push_back(job);
        self.available.notify_one();
    }

    fn pop(&self) -> Option<Job> {
        let mut guard = self.inner.lock().unwrap();
        loop {
            if let Some(job) = guard.jobs.pop_front() {
                return Some(job);
            }
            if guard.closed {
                return None;
            }
            guard = self.available.wait(guard).unwrap();
        }
    }

    fn close(&self) {
        self.inner.lock().unwrap().closed = true;
        self.available.notify_all();
    }
}

#[derive(Clone)]
struct ActiveDownload {
    request: DownloadRequest,
    state: Arc<ProgressState>,
    started: Arc<AtomicBool>,
    /// One runner at a time: set while a pool worker drives this download.
    running: Arc<AtomicBool>,
}

impl ActiveDownload {
    fn new(request: DownloadRequest, id: DownloadId) -> Self {
        Self {
            request,
            state: Arc::new(ProgressState::new(id)),
            started: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Releases the per-download runner latch when the job ends, however it ends.
struct RunnerLatch(Arc<AtomicBool>);

impl Drop for RunnerLatch {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct PoolShared {
    cfg: RuntimeConfig,
    engine: Engine,
    store: BlockingStore,
    events: EventBus,
    jobs: JobQueue,
    active: RwLock<HashMap<DownloadId, ActiveDownload>>,
}

pub struct DownloadPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl DownloadPool {
    pub fn new(cfg: RuntimeConfig, store: BlockingStore, events: EventBus) -> Self {
        let cfg = cfg.normalized();
        let shared = Arc::new(PoolShared {
            engine: Engine::new(cfg.clone(), store.clone()),
            store,
            events,
            jobs: JobQueue::default(),
            active: RwLock::new(HashMap::new()),
            cfg,
        });

        let workers = (0..shared.cfg.max_parallel_downloads)
            .map(|_| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || pool_worker(shared))
            })
            .collect();

        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Enqueues a download. Returns its id (generated unless the request
    /// carried one).
    pub fn add(&self, request: DownloadRequest) -> Result<DownloadId, DownloadError> {
        request.validate()?;
        let mut request = request;
        let id = request.id.unwrap_or_else(DownloadId::new_v4);
        request.id = Some(id);

        let download = ActiveDownload::new(request.clone(), id);
        self.shared.active.write().unwrap().insert(id, download);
        self.shared.jobs.push(Job {
            request,
            is_resume: false,
        });
        Ok(id)
    }

    /// Requests pause of a live download. The `Paused` event follows once
    /// remaining state is persisted.
    pub fn pause(&self, id: DownloadId) -> Result<(), DownloadError> {
        let active = self.shared.active.read().unwrap();
        let download = active.get(&id).ok_or(StoreError::NotFound)?;
        download.state.pause();
        Ok(())
    }

    /// Clears the paused flag and requeues the download. Only downloads the
    /// pool still tracks can be resumed this way; use [`DownloadPool::restore`]
    /// for entries loaded from the durable store.
    pub fn resume(&self, id: DownloadId) -> Result<(), DownloadError> {
        let download = self
            .shared
            .active
            .read()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)?;
        if !download.state.is_paused() {
            // Already queued or downloading; nothing to resume.
            return Ok(());
        }
        download.state.resume();
        download.started.store(false, Ordering::Release);
        self.shared.jobs.push(Job {
            request: download.request,
            is_resume: true,
        });
        self.shared.events.emit(Event::Resumed { id });
        Ok(())
    }

    /// Requeues a download persisted by an earlier process (a paused or
    /// queued store row) and emits `Resumed`.
    pub fn restore(&self, entry: &DownloadEntry) -> Result<DownloadId, DownloadError> {
        let id = entry.id;
        let request = DownloadRequest {
            url: entry.url.clone(),
            dest: Some(entry.dest_path.clone()),
            filename: (!entry.filename.is_empty()).then(|| entry.filename.clone()),
            id: Some(id),
            connections: None,
        };
        request.validate()?;
        let download = ActiveDownload::new(request.clone(), id);
        self.shared.active.write().unwrap().insert(id, download);
        self.shared.jobs.push(Job {
            request,
            is_resume: true,
        });
        self.shared.events.emit(Event::Resumed { id });
        Ok(id)
    }

    /// Aborts the session, marks the download done, and drops it from the
    /// active map and the durable store. Nothing resumable remains.
    pub fn cancel(&self, id: DownloadId) -> Result<(), DownloadError> {
        let removed = self.shared.active.write().unwrap().remove(&id);
        let download = removed.ok_or(StoreError::NotFound)?;
        download.state.abort();
        download.state.mark_done();
        // The store is async under the hood; delete from a plain thread so
        // cancel stays callable from async contexts.
        let store = self.shared.store.clone();
        std::thread::spawn(move || {
            if let Err(e) = store.delete(id) {
                tracing::debug!(id = %id, error = %e, "cancel could not delete store row");
            }
        });
        tracing::info!(id = %id, "download cancelled");
        Ok(())
    }

    /// Pauses every live download.
    pub fn pause_all(&self) {
        for download in self.shared.active.read().unwrap().values() {
            if !download.state.is_done() {
                download.state.pause();
            }
        }
    }

    /// Pauses everything, closes the queue, and waits for every pool worker
    /// to return. On return all pause saves have committed.
    pub fn graceful_shutdown(&self) {
        self.pause_all();
        self.shared.jobs.close();
        let workers: Vec<_> = self.workers.lock().unwrap().drain(..).collect();
        for handle in workers {
            let _ = handle.join();
        }
        tracing::info!("download pool shut down");
    }

    /// Snapshot of a download the pool currently tracks. Finished and
    /// forgotten downloads live in the durable store, not here.
    pub fn get_status(&self, id: DownloadId) -> Option<StatusSnapshot> {
        self.shared
            .active
            .read()
            .unwrap()
            .get(&id)
            .map(live_snapshot)
    }

    /// Snapshots of everything the pool currently tracks.
    pub fn list(&self) -> Vec<StatusSnapshot> {
        self.shared
            .active
            .read()
            .unwrap()
            .values()
            .map(live_snapshot)
            .collect()
    }

    /// Duplicate detection against the live set, trailing-slash normalized.
    pub fn has_download(&self, url: &str) -> bool {
        let norm = url.trim_end_matches('/');
        self.shared
            .active
            .read()
            .unwrap()
            .values()
            .any(|d| !d.state.is_done() && d.request.url.trim_end_matches('/') == norm)
    }

    /// External request hint: either surfaces a `Request` event for user
    /// confirmation or adds directly.
    pub fn request(
        &self,
        url: String,
        filename: Option<String>,
        path: Option<PathBuf>,
        confirm: bool,
    ) -> Result<Option<DownloadId>, DownloadError> {
        if confirm {
            self.shared.events.emit(Event::Request {
                url,
                filename,
                path,
            });
            return Ok(None);
        }
        let mut request = DownloadRequest::new(url);
        request.filename = filename;
        request.dest = path;
        self.add(request).map(Some)
    }
}

fn pool_worker(shared: Arc<PoolShared>) {
    while let Some(job) = shared.jobs.pop() {
        run_job(&shared, job);
    }
}

fn run_job(shared: &PoolShared, job: Job) {
    let Some(id) = job.request.id else {
        return;
    };
    let Some(download) = shared.active.read().unwrap().get(&id).cloned() else {
        // Cancelled while waiting in the queue.
        return;
    };
    if download.state.is_done() {
        return;
    }

    // A resume can land while the paused session is still persisting its
    // state; wait for the previous runner to let go before starting.
    let mut waited = std::time::Duration::ZERO;
    while download.running.swap(true, Ordering::AcqRel) {
        std::thread::sleep(std::time::Duration::from_millis(50));
        waited += std::time::Duration::from_millis(50);
        if waited > std::time::Duration::from_secs(30) {
            tracing::warn!(id = %id, "previous runner did not finish; dropping job");
            return;
        }
    }
    let _latch = RunnerLatch(Arc::clone(&download.running));

    if job.is_resume && download.state.is_paused() {
        // Paused again before we picked it up; stay paused.
        return;
    }
    if !job.is_resume {
        // Record the queued row; ids carried over from the store already
        // have one.
        if let Err(e) = shared.store.add(&queued_entry(&job.request, id)) {
            tracing::debug!(id = %id, error = %e, "queued row not inserted");
        }
    }
    if download.state.is_paused() && !job.is_resume {
        // Paused before it ever started; wait for resume.
        let _ = shared.store.update_status(id, DownloadStatus::Paused);
        shared.events.emit(Event::Paused {
            id,
            downloaded: download.state.downloaded(),
        });
        return;
    }

    let probe = match probe::probe(&job.request.url, &shared.cfg) {
        Ok(p) => p,
        Err(e) => return fail(shared, &download, id, e),
    };
    let filename = job
        .request
        .filename
        .clone()
        .map(|f| probe::sanitize_filename(&f))
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| probe.filename.clone());
    let dest_path = match request::resolve_dest_path(job.request.dest.as_deref(), &filename) {
        Ok(p) => p,
        Err(e) => return fail(shared, &download, id, e),
    };

    download.started.store(true, Ordering::Release);
    shared.events.emit(Event::Started {
        id,
        url: job.request.url.clone(),
        filename: filename.clone(),
        total: probe.file_size,
        dest_path: dest_path.clone(),
    });

    let poller_stop = Arc::new(AtomicBool::new(false));
    let poller = {
        let state = Arc::clone(&download.state);
        let events = shared.events.clone();
        let stop = Arc::clone(&poller_stop);
        let alpha = shared.cfg.speed_ema_alpha;
        std::thread::spawn(move || poller::run(state, events, stop, alpha))
    };

    let result = shared.engine.download(
        &job.request.url,
        &dest_path,
        &probe,
        &download.state,
        job.request.connections,
    );

    poller_stop.store(true, Ordering::Release);
    let _ = poller.join();

    match result {
        Ok(()) => {
            shared.events.emit(Event::Completed {
                id,
                filename,
                elapsed: download.state.elapsed(),
                total: download.state.total_size(),
            });
            shared.active.write().unwrap().remove(&id);
        }
        Err(DownloadError::Paused) => {
            // Stays in the active map so resume finds it.
            shared.events.emit(Event::Paused {
                id,
                downloaded: download.state.downloaded(),
            });
        }
        Err(DownloadError::Cancelled) => {
            shared.active.write().unwrap().remove(&id);
            let _ = shared.store.delete(id);
        }
        Err(e) => fail(shared, &download, id, e),
    }
}

/// Hard failure: surface the reason, drop the download from the pool, and
/// leave nothing resumable behind.
fn fail(shared: &PoolShared, download: &ActiveDownload, id: DownloadId, error: DownloadError) {
    tracing::error!(id = %id, error = %error, "download failed");
    download.state.set_error(error.to_string());
    shared.events.emit(Event::Error {
        id,
        reason: error.to_string(),
    });
    shared.active.write().unwrap().remove(&id);
    let _ = shared.store.delete(id);
}

fn live_snapshot(download: &ActiveDownload) -> StatusSnapshot {
    let state = &download.state;
    let snap = state.snapshot();
    let status = if state.error().is_some() {
        PoolStatus::Error
    } else if state.is_done() {
        PoolStatus::Completed
    } else if state.is_paused() {
        PoolStatus::Paused
    } else if download.started.load(Ordering::Acquire) {
        PoolStatus::Downloading
    } else {
        PoolStatus::Queued
    };
    StatusSnapshot {
        id: state.id(),
        url: download.request.url.clone(),
        filename: download.request.filename.clone(),
        status,
        downloaded: snap.downloaded,
        total: snap.total_size,
        progress: snap.fraction(),
        speed: snap.session_speed(),
        active_connections: snap.active_workers,
    }
}

fn queued_entry(request: &DownloadRequest, id: DownloadId) -> DownloadEntry {
    DownloadEntry::queued(
        id,
        request.url.clone(),
        request.dest.clone().unwrap_or_default(),
        request.filename.clone().unwrap_or_default(),
    )
}
