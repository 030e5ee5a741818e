//! `surge get`: download one URL now, streaming progress to the terminal.

use std::io::Write;
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use anyhow::Result;
use surge_core::config::RuntimeConfig;
use surge_core::events::{Event, EventBus};
use surge_core::pool::{DownloadPool, DownloadRequest};
use surge_core::store::{BlockingStore, StateStore};
use surge_core::DownloadId;

use crate::cli::fmt_bytes;

pub async fn run_get(
    cfg: &RuntimeConfig,
    store: StateStore,
    url: &str,
    out: Option<PathBuf>,
    filename: Option<String>,
    connections: Option<usize>,
) -> Result<()> {
    let blocking = BlockingStore::from_current(store);
    let (bus, rx) = EventBus::new();
    let pool = Arc::new(DownloadPool::new(cfg.clone(), blocking, bus));

    let mut request = DownloadRequest::new(url);
    request.dest = out;
    request.filename = filename;
    request.connections = connections;
    let id = pool.add(request)?;

    let printer = tokio::task::spawn_blocking(move || print_events(rx, id));
    let interrupted = pool.clone();
    tokio::select! {
        finished = printer => {
            pool.graceful_shutdown();
            if !finished.unwrap_or(false) {
                anyhow::bail!("download failed");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\ninterrupted, pausing...");
            interrupted.pause_all();
            interrupted.graceful_shutdown();
            println!("paused; resume with `surge run`");
        }
    }
    Ok(())
}

/// Renders the event stream for one download. Returns whether it ended well.
fn print_events(rx: Receiver<Event>, id: DownloadId) -> bool {
    for event in rx {
        if event.download_id() != Some(id) {
            continue;
        }
        match event {
            Event::Started {
                filename, total, ..
            } => {
                if total > 0 {
                    println!("downloading {filename} ({})", fmt_bytes(total));
                } else {
                    println!("downloading {filename}");
                }
            }
            Event::Progress {
                downloaded,
                total,
                speed,
                active_connections,
                ..
            } => {
                let pct = if total > 0 {
                    format!("{:5.1}%", downloaded as f64 / total as f64 * 100.0)
                } else {
                    "  ?  ".to_string()
                };
                print!(
                    "\r{pct}  {} / {}  {}/s  [{} conn]   ",
                    fmt_bytes(downloaded),
                    fmt_bytes(total),
                    fmt_bytes(speed as u64),
                    active_connections
                );
                let _ = std::io::stdout().flush();
            }
            Event::Completed {
                filename, elapsed, ..
            } => {
                println!("\ndone: {filename} in {:.1}s", elapsed.as_secs_f64());
                return true;
            }
            Event::Paused { downloaded, .. } => {
                println!("\npaused at {}", fmt_bytes(downloaded));
                return true;
            }
            Event::Error { reason, .. } => {
                eprintln!("\nerror: {reason}");
                return false;
            }
            _ => {}
        }
    }
    false
}
