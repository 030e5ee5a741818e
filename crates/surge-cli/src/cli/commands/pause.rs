//! `surge pause`: keep a queued download out of the next `run`.

use anyhow::Result;
use surge_core::store::{DownloadStatus, StateStore};

use crate::cli::parse_id;

pub async fn run_pause(store: &StateStore, raw_id: &str) -> Result<()> {
    let id = parse_id(raw_id)?;
    store.update_status(id, DownloadStatus::Paused).await?;
    println!("paused {id}");
    Ok(())
}
