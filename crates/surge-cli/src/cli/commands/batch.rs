//! `surge batch`: queue every URL from a list file.

use std::path::{Path, PathBuf};

use anyhow::Result;
use surge_core::batch::read_url_file;
use surge_core::pool::DownloadRequest;
use surge_core::store::{DownloadEntry, StateStore};
use surge_core::DownloadId;

pub async fn run_batch(store: &StateStore, path: &Path, out: Option<PathBuf>) -> Result<()> {
    let urls = read_url_file(path)?;
    if urls.is_empty() {
        println!("no URLs in {}", path.display());
        return Ok(());
    }

    let dir = out
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_default();

    let mut queued = 0usize;
    for url in urls {
        if let Err(e) = DownloadRequest::new(&url).validate() {
            eprintln!("skipping {url}: {e}");
            continue;
        }
        let entry = DownloadEntry::queued(DownloadId::new_v4(), url, dir.clone(), "");
        store.add(&entry).await?;
        queued += 1;
    }
    println!("queued {queued} download(s)");
    println!("start them with `surge run`");
    Ok(())
}
