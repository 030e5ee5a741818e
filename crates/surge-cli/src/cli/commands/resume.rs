//! `surge resume`: put a paused download back in the queue.

use anyhow::Result;
use surge_core::store::{DownloadStatus, StateStore};

use crate::cli::parse_id;

pub async fn run_resume(store: &StateStore, raw_id: &str) -> Result<()> {
    let id = parse_id(raw_id)?;
    store.update_status(id, DownloadStatus::Queued).await?;
    println!("resumed {id}");
    println!("start it with `surge run`");
    Ok(())
}
