//! `surge remove`: forget a download, optionally deleting its files.

use anyhow::Result;
use surge_core::storage::part_path;
use surge_core::store::StateStore;

use crate::cli::parse_id;

pub async fn run_remove(store: &StateStore, raw_id: &str, files: bool) -> Result<()> {
    let id = parse_id(raw_id)?;
    let entry = store.get(id).await?;

    if files && !entry.dest_path.as_os_str().is_empty() {
        let dest = if entry.dest_path.is_dir() && !entry.filename.is_empty() {
            entry.dest_path.join(&entry.filename)
        } else {
            entry.dest_path.clone()
        };
        for path in [dest.clone(), part_path(&dest)] {
            match std::fs::remove_file(&path) {
                Ok(()) => println!("deleted {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => eprintln!("could not delete {}: {e}", path.display()),
            }
        }
    }

    store.delete(id).await?;
    println!("removed {id}");
    Ok(())
}
