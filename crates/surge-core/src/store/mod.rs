//! Durable download state (SQLite via sqlx).
//!
//! Two tables: `downloads` (one row per download, keyed by UUID) and
//! `tasks` (remaining byte ranges of paused downloads, cascade-deleted with
//! their download). `save` commits a download row and its task rows in one
//! transaction; a partially saved state is never observable by `load`.

mod blocking;
pub mod types;

pub use blocking::BlockingStore;
pub use types::{url_hash, DownloadEntry, DownloadId, DownloadStatus, SavedDownload};

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::task::Task;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Handle to the SQLite-backed state store. Cheap to clone.
#[derive(Clone)]
pub struct StateStore {
    pool: Pool<Sqlite>,
}

impl StateStore {
    /// Open (or create) the default store under the XDG state directory
    /// (`~/.local/state/surge/downloads.db`) and run migrations.
    pub async fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("surge")?;
        let state_dir = xdg_dirs.get_state_home();
        tokio::fs::create_dir_all(&state_dir).await?;
        Self::open_at(&state_dir.join("downloads.db")).await
    }

    /// Open (or create) a store at the given path.
    pub async fn open_at(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        let store = StateStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory store (tests). Single connection so every query sees the
    /// same database.
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await?;
        let store = StateStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS downloads (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                dest_path TEXT NOT NULL,
                filename TEXT NOT NULL,
                status TEXT NOT NULL,
                total_size INTEGER NOT NULL DEFAULT 0,
                downloaded INTEGER NOT NULL DEFAULT 0,
                url_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                paused_at INTEGER,
                completed_at INTEGER,
                time_taken_ms INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                download_id TEXT NOT NULL REFERENCES downloads(id) ON DELETE CASCADE,
                start_offset INTEGER NOT NULL,
                length INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_download ON tasks(download_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_downloads_path ON downloads(url, dest_path)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Persist a download and its remaining tasks in one transaction:
    /// upsert the row, then replace its task rows. Nothing commits on
    /// failure, so resume state is always complete or absent.
    pub async fn save(&self, entry: &DownloadEntry, tasks: &[Task]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO downloads (
                id, url, dest_path, filename, status, total_size,
                downloaded, url_hash, created_at, paused_at, completed_at,
                time_taken_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(id) DO UPDATE SET
                url = excluded.url,
                dest_path = excluded.dest_path,
                filename = excluded.filename,
                status = excluded.status,
                total_size = excluded.total_size,
                downloaded = excluded.downloaded,
                paused_at = excluded.paused_at,
                completed_at = excluded.completed_at,
                time_taken_ms = excluded.time_taken_ms
            "#,
        )
        .bind(entry.id.to_string())
        .bind(&entry.url)
        .bind(entry.dest_path.to_string_lossy().into_owned())
        .bind(&entry.filename)
        .bind(entry.status.as_str())
        .bind(entry.total_size as i64)
        .bind(entry.downloaded as i64)
        .bind(&entry.url_hash)
        .bind(entry.created_at)
        .bind(entry.paused_at)
        .bind(entry.completed_at)
        .bind(entry.time_taken_ms as i64)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM tasks WHERE download_id = ?1")
            .bind(entry.id.to_string())
            .execute(&mut *tx)
            .await?;

        for task in tasks {
            sqlx::query(
                "INSERT INTO tasks (download_id, start_offset, length) VALUES (?1, ?2, ?3)",
            )
            .bind(entry.id.to_string())
            .bind(task.offset as i64)
            .bind(task.length as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Insert a fresh row (queued downloads). Fails on duplicate id.
    pub async fn add(&self, entry: &DownloadEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO downloads (
                id, url, dest_path, filename, status, total_size,
                downloaded, url_hash, created_at, paused_at, completed_at,
                time_taken_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(&entry.url)
        .bind(entry.dest_path.to_string_lossy().into_owned())
        .bind(&entry.filename)
        .bind(entry.status.as_str())
        .bind(entry.total_size as i64)
        .bind(entry.downloaded as i64)
        .bind(&entry.url_hash)
        .bind(entry.created_at)
        .bind(entry.paused_at)
        .bind(entry.completed_at)
        .bind(entry.time_taken_ms as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch one row by id.
    pub async fn get(&self, id: DownloadId) -> Result<DownloadEntry, StoreError> {
        let row = sqlx::query("SELECT * FROM downloads WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        let row = row.ok_or(StoreError::NotFound)?;
        entry_from_row(&row)
    }

    /// Remaining tasks for a download, ordered by offset.
    pub async fn tasks_for(&self, id: DownloadId) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query(
            "SELECT start_offset, length FROM tasks WHERE download_id = ?1 ORDER BY start_offset",
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| {
                let offset: i64 = row.get("start_offset");
                let length: i64 = row.get("length");
                Task::new(offset as u64, length as u64)
            })
            .collect())
    }

    /// Most recent paused download for `(url, dest_path)`, with its tasks.
    pub async fn load_by_path(
        &self,
        url: &str,
        dest_path: &Path,
    ) -> Result<SavedDownload, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM downloads
            WHERE url = ?1 AND dest_path = ?2 AND status = 'paused'
            ORDER BY paused_at DESC, created_at DESC
            LIMIT 1
            "#,
        )
        .bind(url)
        .bind(dest_path.to_string_lossy().into_owned())
        .fetch_optional(&self.pool)
        .await?;
        let row = row.ok_or(StoreError::NotFound)?;
        let entry = entry_from_row(&row)?;
        let tasks = self.tasks_for(entry.id).await?;
        Ok(SavedDownload { entry, tasks })
    }

    /// All rows, newest first.
    pub async fn list_all(&self) -> Result<Vec<DownloadEntry>, StoreError> {
        let rows = sqlx::query("SELECT * FROM downloads ORDER BY created_at DESC, id DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(entry_from_row).collect()
    }

    pub async fn list_by_status(
        &self,
        status: DownloadStatus,
    ) -> Result<Vec<DownloadEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM downloads WHERE status = ?1 ORDER BY created_at DESC, id DESC",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(entry_from_row).collect()
    }

    /// Remove a download row; its tasks go with it (cascade). Idempotent.
    pub async fn delete(&self, id: DownloadId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM downloads WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Set the status of an existing row, stamping `paused_at` /
    /// `completed_at` as appropriate.
    pub async fn update_status(
        &self,
        id: DownloadId,
        status: DownloadStatus,
    ) -> Result<(), StoreError> {
        let now = unix_timestamp();
        let result = match status {
            DownloadStatus::Paused => {
                sqlx::query("UPDATE downloads SET status = ?1, paused_at = ?2 WHERE id = ?3")
                    .bind(status.as_str())
                    .bind(now)
                    .bind(id.to_string())
                    .execute(&self.pool)
                    .await?
            }
            DownloadStatus::Completed => {
                sqlx::query("UPDATE downloads SET status = ?1, completed_at = ?2 WHERE id = ?3")
                    .bind(status.as_str())
                    .bind(now)
                    .bind(id.to_string())
                    .execute(&self.pool)
                    .await?
            }
            DownloadStatus::Queued => {
                sqlx::query("UPDATE downloads SET status = ?1 WHERE id = ?2")
                    .bind(status.as_str())
                    .bind(id.to_string())
                    .execute(&self.pool)
                    .await?
            }
        };
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Drop all completed rows. Returns how many were removed.
    pub async fn remove_completed(&self) -> Result<u64, StoreError> {
        let r = sqlx::query("DELETE FROM downloads WHERE status = 'completed'")
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected())
    }

    /// Move every queued row to paused. Returns the count.
    pub async fn pause_all(&self) -> Result<u64, StoreError> {
        let now = unix_timestamp();
        let r = sqlx::query(
            "UPDATE downloads SET status = 'paused', paused_at = ?1 WHERE status = 'queued'",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected())
    }

    /// Move every paused row back to queued. Returns the count.
    pub async fn resume_all(&self) -> Result<u64, StoreError> {
        let r = sqlx::query("UPDATE downloads SET status = 'queued' WHERE status = 'paused'")
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected())
    }
}

fn entry_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<DownloadEntry, StoreError> {
    let id_text: String = row.get("id");
    let id = Uuid::parse_str(&id_text)
        .map_err(|_| StoreError::Corrupt(format!("bad download id: {id_text}")))?;
    let dest_path: String = row.get("dest_path");
    let status: String = row.get("status");
    let total_size: i64 = row.get("total_size");
    let downloaded: i64 = row.get("downloaded");
    let time_taken_ms: i64 = row.get("time_taken_ms");
    Ok(DownloadEntry {
        id,
        url: row.get("url"),
        dest_path: dest_path.into(),
        filename: row.get("filename"),
        status: DownloadStatus::from_str(&status),
        total_size: total_size as u64,
        downloaded: downloaded as u64,
        url_hash: row.get("url_hash"),
        created_at: row.get("created_at"),
        paused_at: row.get("paused_at"),
        completed_at: row.get("completed_at"),
        time_taken_ms: time_taken_ms as u64,
    })
}

pub(crate) fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sample_entry(url: &str) -> DownloadEntry {
        DownloadEntry {
            id: Uuid::new_v4(),
            url: url.to_string(),
            dest_path: PathBuf::from("/tmp/downloads/file.bin"),
            filename: "file.bin".to_string(),
            status: DownloadStatus::Paused,
            total_size: 1_048_576,
            downloaded: 314_572,
            url_hash: url_hash(url),
            created_at: unix_timestamp(),
            paused_at: Some(unix_timestamp()),
            completed_at: None,
            time_taken_ms: 1500,
        }
    }

    #[tokio::test]
    async fn save_then_load_by_path_roundtrip() {
        let store = StateStore::open_memory().await.unwrap();
        let entry = sample_entry("https://example.com/file.bin");
        let tasks = vec![Task::new(314_572, 100_000), Task::new(500_000, 548_576)];

        store.save(&entry, &tasks).await.unwrap();

        let loaded = store
            .load_by_path("https://example.com/file.bin", &entry.dest_path)
            .await
            .unwrap();
        assert_eq!(loaded.entry.id, entry.id);
        assert_eq!(loaded.entry.downloaded, 314_572);
        assert_eq!(loaded.entry.status, DownloadStatus::Paused);
        assert_eq!(loaded.entry.url_hash, entry.url_hash);
        assert_eq!(loaded.tasks, tasks);
    }

    #[tokio::test]
    async fn save_is_an_upsert_and_replaces_tasks() {
        let store = StateStore::open_memory().await.unwrap();
        let mut entry = sample_entry("https://example.com/f");
        store.save(&entry, &[Task::new(0, 10)]).await.unwrap();

        entry.downloaded = 999;
        store.save(&entry, &[Task::new(999, 1)]).await.unwrap();

        let loaded = store.get(entry.id).await.unwrap();
        assert_eq!(loaded.downloaded, 999);
        let tasks = store.tasks_for(entry.id).await.unwrap();
        assert_eq!(tasks, vec![Task::new(999, 1)]);
    }

    #[tokio::test]
    async fn load_by_path_missing_is_not_found() {
        let store = StateStore::open_memory().await.unwrap();
        let err = store
            .load_by_path("https://nowhere.test/x", Path::new("/tmp/x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn delete_cascades_to_tasks() {
        let store = StateStore::open_memory().await.unwrap();
        let entry = sample_entry("https://example.com/f");
        store.save(&entry, &[Task::new(0, 10)]).await.unwrap();

        store.delete(entry.id).await.unwrap();
        assert!(matches!(
            store.get(entry.id).await.unwrap_err(),
            StoreError::NotFound
        ));
        assert!(store.tasks_for(entry.id).await.unwrap().is_empty());

        // Deleting again is fine.
        store.delete(entry.id).await.unwrap();
    }

    #[tokio::test]
    async fn update_status_stamps_timestamps() {
        let store = StateStore::open_memory().await.unwrap();
        let mut entry = sample_entry("https://example.com/f");
        entry.status = DownloadStatus::Queued;
        entry.paused_at = None;
        store.add(&entry).await.unwrap();

        store
            .update_status(entry.id, DownloadStatus::Completed)
            .await
            .unwrap();
        let loaded = store.get(entry.id).await.unwrap();
        assert_eq!(loaded.status, DownloadStatus::Completed);
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn update_status_unknown_id_is_not_found() {
        let store = StateStore::open_memory().await.unwrap();
        let err = store
            .update_status(Uuid::new_v4(), DownloadStatus::Paused)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn bulk_helpers() {
        let store = StateStore::open_memory().await.unwrap();
        let mut a = sample_entry("https://a.test/1");
        a.status = DownloadStatus::Queued;
        let mut b = sample_entry("https://b.test/2");
        b.status = DownloadStatus::Queued;
        let mut c = sample_entry("https://c.test/3");
        c.status = DownloadStatus::Completed;
        for e in [&a, &b, &c] {
            store.add(e).await.unwrap();
        }

        assert_eq!(store.pause_all().await.unwrap(), 2);
        assert_eq!(
            store
                .list_by_status(DownloadStatus::Paused)
                .await
                .unwrap()
                .len(),
            2
        );
        assert_eq!(store.resume_all().await.unwrap(), 2);
        assert_eq!(store.remove_completed().await.unwrap(), 1);
        assert_eq!(store.list_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn most_recent_paused_wins_for_same_path() {
        let store = StateStore::open_memory().await.unwrap();
        let mut old = sample_entry("https://example.com/f");
        old.paused_at = Some(100);
        let mut new = sample_entry("https://example.com/f");
        new.paused_at = Some(200);
        new.downloaded = 777;
        store.save(&old, &[]).await.unwrap();
        store.save(&new, &[]).await.unwrap();

        let loaded = store
            .load_by_path("https://example.com/f", &old.dest_path)
            .await
            .unwrap();
        assert_eq!(loaded.entry.downloaded, 777);
    }
}
