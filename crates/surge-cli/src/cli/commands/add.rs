//! `surge add`: queue a download for a later `surge run`.

use std::path::PathBuf;

use anyhow::Result;
use surge_core::pool::DownloadRequest;
use surge_core::store::{DownloadEntry, StateStore};
use surge_core::DownloadId;

pub async fn run_add(
    store: &StateStore,
    url: &str,
    out: Option<PathBuf>,
    filename: Option<String>,
) -> Result<()> {
    DownloadRequest::new(url).validate()?;

    let dir = out
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_default();
    let id = DownloadId::new_v4();
    let entry = DownloadEntry::queued(id, url, dir, filename.unwrap_or_default());
    store.add(&entry).await?;
    println!("queued {id}");
    println!("start it with `surge run`");
    Ok(())
}
