//! Shared progress state for one download.
//!
//! Numeric counters and flags are atomics so workers update them without a
//! lock; multi-field reads go through [`ProgressState::snapshot`], which
//! holds a short critical section so observers see a consistent tuple.
//! Session accounting (`session_start_bytes`, `start_time`) keeps speed
//! readings honest across pause/resume: a resumed download must not report
//! a spike from bytes of prior sessions.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::error::DownloadError;
use crate::store::DownloadId;

/// Consistent view of one download's progress.
#[derive(Debug, Clone, Copy)]
pub struct ProgressSnapshot {
    pub downloaded: u64,
    pub total_size: u64,
    /// Elapsed time of the current session only.
    pub session_elapsed: Duration,
    pub active_workers: usize,
    /// Bytes already present when the current session started.
    pub session_start_bytes: u64,
}

impl ProgressSnapshot {
    /// Current-session speed in bytes/sec.
    pub fn session_speed(&self) -> f64 {
        let secs = self.session_elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.downloaded.saturating_sub(self.session_start_bytes) as f64 / secs
    }

    /// Fraction complete in [0.0, 1.0]; 0 when the total is unknown.
    pub fn fraction(&self) -> f64 {
        if self.total_size == 0 {
            return 0.0;
        }
        (self.downloaded as f64 / self.total_size as f64).min(1.0)
    }
}

struct Session {
    start_time: Instant,
    cancel: Option<CancelToken>,
}

/// Owned by one download for its lifetime; shared between its workers,
/// monitors and any number of observers.
pub struct ProgressState {
    id: DownloadId,
    total_size: AtomicU64,
    downloaded: AtomicU64,
    session_start_bytes: AtomicU64,
    /// Summed duration of prior sessions, nanoseconds.
    saved_elapsed: AtomicU64,
    active_workers: AtomicUsize,
    done: AtomicBool,
    paused: AtomicBool,
    error: Mutex<Option<String>>,
    session: Mutex<Session>,
}

impl ProgressState {
    pub fn new(id: DownloadId) -> Self {
        Self {
            id,
            total_size: AtomicU64::new(0),
            downloaded: AtomicU64::new(0),
            session_start_bytes: AtomicU64::new(0),
            saved_elapsed: AtomicU64::new(0),
            active_workers: AtomicUsize::new(0),
            done: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            error: Mutex::new(None),
            session: Mutex::new(Session {
                start_time: Instant::now(),
                cancel: None,
            }),
        }
    }

    pub fn id(&self) -> DownloadId {
        self.id
    }

    /// Sets the total size once the probe has run, capturing the session
    /// baseline. Fails once the download has completed.
    pub fn set_total(&self, total: u64) -> Result<(), DownloadError> {
        if self.is_done() {
            return Err(DownloadError::AlreadyCompleted);
        }
        let mut session = self.session.lock().unwrap();
        self.total_size.store(total, Ordering::Release);
        self.session_start_bytes
            .store(self.downloaded.load(Ordering::Acquire), Ordering::Release);
        session.start_time = Instant::now();
        Ok(())
    }

    /// Captures `session_start_bytes = downloaded` and resets the session
    /// clock. Called at the start of every fresh or resumed session.
    pub fn sync_session_start(&self) {
        let mut session = self.session.lock().unwrap();
        self.session_start_bytes
            .store(self.downloaded.load(Ordering::Acquire), Ordering::Release);
        session.start_time = Instant::now();
    }

    /// Atomic add. Callers must clamp `n` to their task's `stop_at` before
    /// calling so stolen ranges are never counted twice.
    pub fn add_downloaded(&self, n: u64) -> u64 {
        self.downloaded.fetch_add(n, Ordering::AcqRel) + n
    }

    /// Overwrites the counter (resume restore / fresh reset).
    pub fn set_downloaded(&self, n: u64) {
        self.downloaded.store(n, Ordering::Release);
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Acquire)
    }

    pub fn total_size(&self) -> u64 {
        self.total_size.load(Ordering::Acquire)
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::Acquire)
    }

    pub fn worker_started(&self) {
        self.active_workers.fetch_add(1, Ordering::AcqRel);
    }

    pub fn worker_finished(&self) {
        self.active_workers.fetch_sub(1, Ordering::AcqRel);
    }

    /// Installs the cancel handle for the current session, replacing any
    /// handle left over from a previous session.
    pub fn install_cancel(&self, token: CancelToken) {
        self.session.lock().unwrap().cancel = Some(token);
    }

    /// Requests pause: sets the flag and aborts the current session's I/O.
    pub fn pause(&self) {
        if self.is_done() {
            return;
        }
        self.paused.store(true, Ordering::Release);
        if let Some(cancel) = self.session.lock().unwrap().cancel.clone() {
            cancel.cancel();
        }
    }

    /// Clears the paused flag. Idempotent.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    /// Aborts the current session's I/O without marking the download paused
    /// (the cancel path).
    pub fn abort(&self) {
        if let Some(cancel) = self.session.lock().unwrap().cancel.clone() {
            cancel.cancel();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn mark_done(&self) {
        self.done.store(true, Ordering::Release);
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn set_error(&self, reason: impl Into<String>) {
        *self.error.lock().unwrap() = Some(reason.into());
    }

    pub fn error(&self) -> Option<String> {
        self.error.lock().unwrap().clone()
    }

    pub fn set_saved_elapsed(&self, elapsed: Duration) {
        self.saved_elapsed
            .store(elapsed.as_nanos() as u64, Ordering::Release);
    }

    /// Duration accumulated by prior sessions.
    pub fn saved_elapsed(&self) -> Duration {
        Duration::from_nanos(self.saved_elapsed.load(Ordering::Acquire))
    }

    /// Wall time of the current session.
    pub fn session_elapsed(&self) -> Duration {
        self.session.lock().unwrap().start_time.elapsed()
    }

    /// Total elapsed across all sessions.
    pub fn elapsed(&self) -> Duration {
        self.saved_elapsed() + self.session_elapsed()
    }

    /// Mutually consistent multi-field read.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let session = self.session.lock().unwrap();
        ProgressSnapshot {
            downloaded: self.downloaded.load(Ordering::Acquire),
            total_size: self.total_size.load(Ordering::Acquire),
            session_elapsed: session.start_time.elapsed(),
            active_workers: self.active_workers.load(Ordering::Acquire),
            session_start_bytes: self.session_start_bytes.load(Ordering::Acquire),
        }
    }
}
