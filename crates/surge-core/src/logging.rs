//! Logging init: file under the XDG state dir, or fallback to stderr.

use anyhow::Result;
use std::fs;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,surge=debug"))
}

/// Initialize structured logging to `~/.local/state/surge/surge.log`.
/// On failure (e.g. log dir unwritable), returns Err so the caller can fall
/// back to [`init_stderr`].
pub fn init() -> Result<()> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("surge")?;
    let log_dir = xdg_dirs.get_state_home();
    fs::create_dir_all(&log_dir)?;
    let log_path = log_dir.join("surge.log");

    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // A mutex-guarded file is the smallest writer that satisfies MakeWriter.
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();

    tracing::info!("surge logging initialized at {}", log_path.display());
    Ok(())
}

/// Initialize logging to stderr only (no file). Use when `init()` fails so
/// the CLI doesn't crash on an unwritable state dir.
pub fn init_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}
