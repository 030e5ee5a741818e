//! `surge status`: one download in detail.

use anyhow::Result;
use surge_core::store::StateStore;

use crate::cli::{fmt_bytes, parse_id};

pub async fn run_status(store: &StateStore, raw_id: &str) -> Result<()> {
    let id = parse_id(raw_id)?;
    let entry = store.get(id).await?;
    let tasks = store.tasks_for(id).await?;

    println!("id:         {}", entry.id);
    println!("url:        {}", entry.url);
    println!("file:       {}", entry.filename);
    println!("dest:       {}", entry.dest_path.display());
    println!("status:     {}", entry.status.as_str());
    if entry.total_size > 0 {
        println!(
            "progress:   {} / {} ({:.1}%)",
            fmt_bytes(entry.downloaded),
            fmt_bytes(entry.total_size),
            entry.downloaded as f64 / entry.total_size as f64 * 100.0
        );
    }
    if entry.time_taken_ms > 0 {
        println!("time spent: {:.1}s", entry.time_taken_ms as f64 / 1000.0);
    }
    if !tasks.is_empty() {
        let remaining: u64 = tasks.iter().map(|t| t.length).sum();
        println!("remaining:  {} in {} range(s)", fmt_bytes(remaining), tasks.len());
    }
    println!("url hash:   {}", entry.url_hash);
    Ok(())
}
