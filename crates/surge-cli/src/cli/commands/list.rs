//! `surge list`: all known downloads.

use anyhow::Result;
use surge_core::store::StateStore;

use crate::cli::fmt_bytes;

pub async fn run_list(store: &StateStore) -> Result<()> {
    let entries = store.list_all().await?;
    if entries.is_empty() {
        println!("no downloads");
        return Ok(());
    }
    for entry in entries {
        let name = if entry.filename.is_empty() {
            entry.url.as_str()
        } else {
            entry.filename.as_str()
        };
        let size = if entry.total_size > 0 {
            format!(
                "{} / {}",
                fmt_bytes(entry.downloaded),
                fmt_bytes(entry.total_size)
            )
        } else {
            "-".to_string()
        };
        println!("{}  {:9}  {:>22}  {}", entry.id, entry.status.as_str(), size, name);
    }
    Ok(())
}
