//! `surge run`: drive every queued and paused download through the pool.

use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use anyhow::Result;
use surge_core::config::RuntimeConfig;
use surge_core::events::{Event, EventBus};
use surge_core::pool::{DownloadPool, DownloadRequest};
use surge_core::store::{BlockingStore, DownloadStatus, StateStore};

use crate::cli::fmt_bytes;

pub async fn run_scheduler(
    cfg: &RuntimeConfig,
    store: StateStore,
    jobs: Option<usize>,
    out: Option<PathBuf>,
) -> Result<()> {
    let queued = store.list_by_status(DownloadStatus::Queued).await?;
    let paused = store.list_by_status(DownloadStatus::Paused).await?;
    if queued.is_empty() && paused.is_empty() {
        println!("nothing queued; add downloads with `surge add <url>`");
        return Ok(());
    }

    let mut cfg = cfg.clone();
    if let Some(jobs) = jobs {
        cfg.max_parallel_downloads = jobs.max(1);
    }

    let blocking = BlockingStore::from_current(store.clone());
    let (bus, rx) = EventBus::new();
    let pool = Arc::new(DownloadPool::new(cfg, blocking, bus));

    let mut expected = 0usize;
    for entry in queued {
        let mut request = DownloadRequest::new(entry.url.clone());
        request.id = Some(entry.id);
        request.dest = if entry.dest_path.as_os_str().is_empty() {
            out.clone()
        } else {
            Some(entry.dest_path.clone())
        };
        request.filename = (!entry.filename.is_empty()).then(|| entry.filename.clone());
        match pool.add(request) {
            Ok(_) => expected += 1,
            Err(e) => eprintln!("skipping {}: {e}", entry.url),
        }
    }
    for entry in paused {
        match pool.restore(&entry) {
            Ok(_) => expected += 1,
            Err(e) => eprintln!("cannot resume {}: {e}", entry.id),
        }
    }
    println!("running {expected} download(s)");

    let printer = tokio::task::spawn_blocking(move || watch_events(rx, expected));
    let interrupted = pool.clone();
    tokio::select! {
        _ = printer => {
            pool.graceful_shutdown();
        }
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\ninterrupted, pausing all downloads...");
            interrupted.pause_all();
            interrupted.graceful_shutdown();
            println!("paused; resume with `surge run`");
        }
    }
    Ok(())
}

/// Prints a line per lifecycle event until every download reached an end
/// state (completed, paused, or failed).
fn watch_events(rx: Receiver<Event>, mut outstanding: usize) {
    if outstanding == 0 {
        return;
    }
    for event in rx {
        match event {
            Event::Started {
                id,
                filename,
                total,
                ..
            } => {
                println!("[{id}] downloading {filename} ({})", fmt_bytes(total));
            }
            Event::Completed { id, filename, .. } => {
                println!("[{id}] done: {filename}");
                outstanding -= 1;
            }
            Event::Paused { id, downloaded } => {
                println!("[{id}] paused at {}", fmt_bytes(downloaded));
                outstanding -= 1;
            }
            Event::Error { id, reason } => {
                eprintln!("[{id}] failed: {reason}");
                outstanding -= 1;
            }
            _ => {}
        }
        if outstanding == 0 {
            return;
        }
    }
}
