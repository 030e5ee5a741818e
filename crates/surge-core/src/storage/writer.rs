//! The `.surge` part file: positional writes, preallocation, finalize.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;

use super::part_path;

/// Open handle on an in-progress download file. Clones share the handle;
/// each `write_at` targets an independent offset (pwrite), so workers write
/// concurrently without a lock as long as their ranges are disjoint.
#[derive(Clone)]
pub struct PartFile {
    file: Arc<File>,
    path: PathBuf,
}

impl PartFile {
    /// Opens (or creates) the part file for `final_path` read+write without
    /// truncation, so resuming keeps previously written ranges.
    pub fn open(final_path: &Path) -> io::Result<Self> {
        let path = part_path(final_path);
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Ok(Self {
            file: Arc::new(file),
            path,
        })
    }

    /// Sizes the file to exactly `size` bytes and preallocates blocks where
    /// the platform supports it (`posix_fallocate`, falling back to the
    /// sparse `set_len` result). Fresh starts call this; resume must not.
    pub fn allocate(&self, size: u64) -> io::Result<()> {
        self.file.set_len(size)?;
        #[cfg(unix)]
        if size > 0 {
            let rc = unsafe { libc::posix_fallocate(self.file.as_raw_fd(), 0, size as libc::off_t) };
            if rc != 0 {
                tracing::debug!(errno = rc, "posix_fallocate unavailable, keeping sparse file");
            }
        }
        Ok(())
    }

    #[cfg(unix)]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.file.write_all_at(data, offset)
    }

    /// Non-Unix fallback: seek+write on a duplicated handle.
    #[cfg(not(unix))]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        let mut f = self.file.try_clone()?;
        f.seek(SeekFrom::Start(offset))?;
        f.write_all(data)
    }

    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    /// Current on-disk length.
    pub fn len(&self) -> io::Result<u64> {
        self.file.metadata().map(|m| m.len())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Renames the part file onto `final_path`, consuming the handle.
    ///
    /// If the rename fails because the part file is gone but `final_path`
    /// already exists at `expected_size`, another actor completed the same
    /// download and this is treated as success.
    pub fn finalize(self, final_path: &Path, expected_size: u64) -> io::Result<()> {
        let path = self.path.clone();
        drop(self.file);

        match std::fs::rename(&path, final_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                match std::fs::metadata(final_path) {
                    Ok(meta) if meta.len() == expected_size => {
                        tracing::debug!(
                            path = %final_path.display(),
                            "destination already completed by another actor"
                        );
                        Ok(())
                    }
                    _ => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }
}
