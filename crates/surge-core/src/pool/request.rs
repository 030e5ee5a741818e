//! User-facing download requests.

use std::path::{Path, PathBuf};

use crate::error::DownloadError;
use crate::store::DownloadId;

/// What a caller hands the pool: a URL plus optional placement hints.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// Absolute http/https URL.
    pub url: String,
    /// Output directory, or an absolute file path to write to.
    pub dest: Option<PathBuf>,
    /// Filename hint; overrides the probed canonical name.
    pub filename: Option<String>,
    /// Explicit id; generated when absent.
    pub id: Option<DownloadId>,
    /// Connection-count override; the engine chooses from the file size
    /// when absent.
    pub connections: Option<usize>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            dest: None,
            filename: None,
            id: None,
            connections: None,
        }
    }

    pub fn dest(mut self, dest: impl Into<PathBuf>) -> Self {
        self.dest = Some(dest.into());
        self
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn connections(mut self, n: usize) -> Self {
        self.connections = Some(n);
        self
    }

    /// Checks the URL is absolute http/https with a host.
    pub fn validate(&self) -> Result<(), DownloadError> {
        let parsed = url::Url::parse(&self.url)
            .map_err(|_| DownloadError::InvalidUrl(self.url.clone()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DownloadError::InvalidUrl(self.url.clone()));
        }
        if parsed.host_str().is_none() {
            return Err(DownloadError::InvalidUrl(self.url.clone()));
        }
        Ok(())
    }
}

/// Final destination path: an existing directory gets the filename joined
/// on; any other path is taken as the file path itself; no hint at all
/// lands in the current directory.
pub(crate) fn resolve_dest_path(
    dest: Option<&Path>,
    filename: &str,
) -> Result<PathBuf, DownloadError> {
    match dest {
        Some(p) if p.is_dir() => Ok(p.join(filename)),
        Some(p) => Ok(p.to_path_buf()),
        None => {
            let cwd = std::env::current_dir()
                .map_err(|e| DownloadError::Other(anyhow::Error::from(e)))?;
            Ok(cwd.join(filename))
        }
    }
}
