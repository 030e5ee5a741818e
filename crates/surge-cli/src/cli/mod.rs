//! CLI for the Surge download manager.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use surge_core::config;
use surge_core::store::StateStore;

use commands::{
    run_add, run_batch, run_get, run_list, run_pause, run_remove, run_resume, run_scheduler,
    run_status,
};

/// Top-level CLI for the Surge download manager.
#[derive(Debug, Parser)]
#[command(name = "surge")]
#[command(about = "Surge: multi-connection download manager", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download a URL right now, with live progress.
    Get {
        /// Direct HTTP/HTTPS URL to download.
        url: String,
        /// Directory (or file path) to save to. Default: current directory.
        #[arg(long, short = 'o', value_name = "PATH")]
        out: Option<PathBuf>,
        /// Filename override; the server's name is used otherwise.
        #[arg(long, value_name = "NAME")]
        filename: Option<String>,
        /// Connection count override; chosen from the file size otherwise.
        #[arg(long, short = 'n', value_name = "N")]
        connections: Option<usize>,
    },

    /// Queue a download without starting it (see `run`).
    Add {
        /// Direct HTTP/HTTPS URL to download.
        url: String,
        /// Directory where the file will be saved. Stored with the download
        /// so `run` works from any working directory.
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
        /// Filename override.
        #[arg(long, value_name = "NAME")]
        filename: Option<String>,
    },

    /// Run every queued and paused download. Ctrl-C pauses them all safely.
    Run {
        /// Downloads to run at once (default from config).
        #[arg(long, value_name = "N")]
        jobs: Option<usize>,
        /// Directory for downloads queued without one.
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },

    /// List all known downloads.
    List,

    /// Show one download in detail.
    Status {
        /// Download id (UUID).
        id: String,
    },

    /// Mark a queued download paused so `run` skips it.
    Pause {
        /// Download id (UUID).
        id: String,
    },

    /// Move a paused download back to queued.
    Resume {
        /// Download id (UUID).
        id: String,
    },

    /// Forget a download. With --files, also deletes its output files.
    Remove {
        /// Download id (UUID).
        id: String,
        /// Also delete the final file and any in-progress `.surge` file.
        #[arg(long)]
        files: bool,
    },

    /// Queue every URL from a list file (one per line, `#` comments).
    Batch {
        /// Path to the URL list.
        path: PathBuf,
        /// Directory where the files will be saved.
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },
}

pub async fn run_from_args() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_or_init()?.normalized();
    tracing::debug!(?cfg, "loaded config");
    let store = StateStore::open_default().await?;

    match cli.command {
        CliCommand::Get {
            url,
            out,
            filename,
            connections,
        } => run_get(&cfg, store, &url, out, filename, connections).await?,
        CliCommand::Add { url, out, filename } => run_add(&store, &url, out, filename).await?,
        CliCommand::Run { jobs, out } => run_scheduler(&cfg, store, jobs, out).await?,
        CliCommand::List => run_list(&store).await?,
        CliCommand::Status { id } => run_status(&store, &id).await?,
        CliCommand::Pause { id } => run_pause(&store, &id).await?,
        CliCommand::Resume { id } => run_resume(&store, &id).await?,
        CliCommand::Remove { id, files } => run_remove(&store, &id, files).await?,
        CliCommand::Batch { path, out } => run_batch(&store, &path, out).await?,
    }
    Ok(())
}

/// Human-readable byte count (binary units).
pub(crate) fn fmt_bytes(n: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = n as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{n} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Parse a user-supplied download id.
pub(crate) fn parse_id(raw: &str) -> Result<surge_core::DownloadId> {
    raw.parse()
        .map_err(|_| anyhow::anyhow!("not a download id: {raw}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fmt_bytes_units() {
        assert_eq!(fmt_bytes(512), "512 B");
        assert_eq!(fmt_bytes(2048), "2.0 KiB");
        assert_eq!(fmt_bytes(1_048_576), "1.0 MiB");
        assert_eq!(fmt_bytes(5 * 1024 * 1024 * 1024), "5.0 GiB");
    }

    #[test]
    fn parse_id_accepts_uuid() {
        assert!(parse_id("550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(parse_id("42").is_err());
    }

    #[test]
    fn cli_parses_get_with_flags() {
        let cli = Cli::try_parse_from([
            "surge",
            "get",
            "https://example.com/f.iso",
            "-o",
            "/tmp",
            "-n",
            "8",
        ])
        .unwrap();
        match cli.command {
            CliCommand::Get {
                url, connections, ..
            } => {
                assert_eq!(url, "https://example.com/f.iso");
                assert_eq!(connections, Some(8));
            }
            other => panic!("wrong command: {other:?}"),
        }
    }

    #[test]
    fn cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["surge"]).is_err());
    }
}
