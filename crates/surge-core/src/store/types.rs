//! Types stored by the durable state store.

use std::path::PathBuf;

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Download identifier: a 128-bit UUID, generated when a request carries
/// none.
pub type DownloadId = Uuid;

/// Persistent status of a download row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Queued,
    Paused,
    Completed,
}

impl DownloadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DownloadStatus::Queued => "queued",
            DownloadStatus::Paused => "paused",
            DownloadStatus::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "paused" => DownloadStatus::Paused,
            "completed" => DownloadStatus::Completed,
            _ => DownloadStatus::Queued,
        }
    }
}

/// One row of the `downloads` table.
#[derive(Debug, Clone)]
pub struct DownloadEntry {
    pub id: DownloadId,
    pub url: String,
    pub dest_path: PathBuf,
    pub filename: String,
    pub status: DownloadStatus,
    pub total_size: u64,
    pub downloaded: u64,
    /// First 8 bytes of SHA-256(url), hex-encoded; a secondary label only.
    pub url_hash: String,
    /// Unix seconds.
    pub created_at: i64,
    pub paused_at: Option<i64>,
    pub completed_at: Option<i64>,
    /// Accumulated download time, milliseconds.
    pub time_taken_ms: u64,
}

impl DownloadEntry {
    /// A fresh queued row; sizes and timestamps are filled in by the engine
    /// once the download runs.
    pub fn queued(
        id: DownloadId,
        url: impl Into<String>,
        dest_path: impl Into<PathBuf>,
        filename: impl Into<String>,
    ) -> Self {
        let url = url.into();
        Self {
            id,
            url_hash: url_hash(&url),
            url,
            dest_path: dest_path.into(),
            filename: filename.into(),
            status: DownloadStatus::Queued,
            total_size: 0,
            downloaded: 0,
            created_at: super::unix_timestamp(),
            paused_at: None,
            completed_at: None,
            time_taken_ms: 0,
        }
    }
}

/// A paused download loaded back from the store: its row plus the byte
/// ranges still owed.
#[derive(Debug, Clone)]
pub struct SavedDownload {
    pub entry: DownloadEntry,
    pub tasks: Vec<crate::task::Task>,
}

/// `SHA-256(url)[0..8]`, hex-encoded (16 chars).
pub fn url_hash(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_string_roundtrip() {
        for s in [
            DownloadStatus::Queued,
            DownloadStatus::Paused,
            DownloadStatus::Completed,
        ] {
            assert_eq!(DownloadStatus::from_str(s.as_str()), s);
        }
        assert_eq!(DownloadStatus::from_str("garbage"), DownloadStatus::Queued);
    }

    #[test]
    fn url_hash_is_16_hex_chars() {
        let h = url_hash("https://example.com/file.bin");
        assert_eq!(h.len(), 16);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
        // Stable across calls, distinct across URLs.
        assert_eq!(h, url_hash("https://example.com/file.bin"));
        assert_ne!(h, url_hash("https://example.com/other.bin"));
    }
}
