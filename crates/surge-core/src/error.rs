//! Engine-level error kinds.
//!
//! `Paused` and `Cancelled` are sentinels, not failures: the pool treats
//! `Paused` as "remain in the active map" and `Cancelled` as a clean exit.

use std::time::Duration;

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// The capability probe got a response we cannot download from.
    #[error("probe failed with HTTP {status}")]
    ProbeFailed { status: u32 },

    /// The probe could not complete at the transport level.
    #[error("probe failed: {0}")]
    ProbeIo(String),

    /// The request URL is missing, relative, or not http/https.
    #[error("invalid download URL: {0}")]
    InvalidUrl(String),

    /// Server ignored the Range header; only single-connection mode works.
    #[error("server does not support byte ranges")]
    RangeNotSupported,

    /// The session was paused; remaining ranges were persisted.
    #[error("download paused")]
    Paused,

    /// The session was cancelled outside of a pause; nothing was persisted.
    #[error("download cancelled")]
    Cancelled,

    /// A response status outside the accepted set for this request.
    #[error("unexpected HTTP status {0}")]
    UnexpectedStatus(u32),

    /// Host is rate limited for the given duration. Absorbed by workers,
    /// never surfaced on the event bus.
    #[error("rate limited for {0:?}")]
    RateLimited(Duration),

    /// Disk write failed; fatal for the download.
    #[error("write failed: {0}")]
    WriteFailed(#[source] std::io::Error),

    /// Body read failed past all retries.
    #[error("read failed: {0}")]
    ReadFailed(String),

    /// Mutation attempted on a finished download.
    #[error("download already completed")]
    AlreadyCompleted,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DownloadError {
    /// True for the sentinel outcomes that are not failures.
    pub fn is_interruption(&self) -> bool {
        matches!(self, DownloadError::Paused | DownloadError::Cancelled)
    }
}
