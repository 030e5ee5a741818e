//! Blocking facade over the async store for engine threads.
//!
//! The store API is async because sqlx is; download workers and the pool
//! run on plain threads. This wrapper carries a runtime handle and bridges
//! with `Handle::block_on`. Call it from ordinary threads only: blocking
//! inside an async task would stall the runtime.

use std::path::Path;

use tokio::runtime::Handle;

use super::{DownloadEntry, DownloadId, DownloadStatus, SavedDownload, StateStore, StoreError};
use crate::task::Task;

#[derive(Clone)]
pub struct BlockingStore {
    store: StateStore,
    handle: Handle,
}

impl BlockingStore {
    pub fn new(store: StateStore, handle: Handle) -> Self {
        Self { store, handle }
    }

    /// Capture the ambient runtime; must be called from async context.
    pub fn from_current(store: StateStore) -> Self {
        Self::new(store, Handle::current())
    }

    /// The wrapped async store.
    pub fn async_store(&self) -> &StateStore {
        &self.store
    }

    pub fn save(&self, entry: &DownloadEntry, tasks: &[Task]) -> Result<(), StoreError> {
        self.handle.block_on(self.store.save(entry, tasks))
    }

    pub fn add(&self, entry: &DownloadEntry) -> Result<(), StoreError> {
        self.handle.block_on(self.store.add(entry))
    }

    pub fn get(&self, id: DownloadId) -> Result<DownloadEntry, StoreError> {
        self.handle.block_on(self.store.get(id))
    }

    pub fn load_by_path(&self, url: &str, dest_path: &Path) -> Result<SavedDownload, StoreError> {
        self.handle.block_on(self.store.load_by_path(url, dest_path))
    }

    pub fn list_all(&self) -> Result<Vec<DownloadEntry>, StoreError> {
        self.handle.block_on(self.store.list_all())
    }

    pub fn list_by_status(&self, status: DownloadStatus) -> Result<Vec<DownloadEntry>, StoreError> {
        self.handle.block_on(self.store.list_by_status(status))
    }

    pub fn delete(&self, id: DownloadId) -> Result<(), StoreError> {
        self.handle.block_on(self.store.delete(id))
    }

    pub fn update_status(&self, id: DownloadId, status: DownloadStatus) -> Result<(), StoreError> {
        self.handle.block_on(self.store.update_status(id, status))
    }
}
