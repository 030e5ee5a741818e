//! Engine tuning knobs, loaded from `~/.config/surge/config.toml`.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::task::align_down;

/// Queued tasks per worker the initial chunk size aims for.
pub const TASKS_PER_WORKER: u64 = 4;

/// Tuning options for the download engine. All byte sizes are in bytes,
/// all timeouts in seconds. A zero numeric field or empty string means
/// "use the default" (see [`RuntimeConfig::normalized`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum concurrent connections to a single host.
    pub max_connections_per_host: usize,
    /// Maximum concurrent connections across all downloads.
    pub max_global_connections: usize,
    /// Downloads the pool runs at once.
    pub max_parallel_downloads: usize,
    /// User-Agent header sent on every request.
    pub user_agent: String,
    /// Smallest range the balancer will split down to.
    pub min_chunk_size: u64,
    /// Largest initial range handed to a worker.
    pub max_chunk_size: u64,
    /// Fixed initial chunk size. 0 computes one from file size and
    /// connection count.
    pub target_chunk_size: u64,
    /// Receive buffer per worker connection.
    pub worker_buffer_size: usize,
    /// Attempts per task before it is requeued.
    pub max_task_retries: u32,
    /// A worker slower than this fraction of the mean gets preempted.
    pub slow_worker_threshold: f64,
    /// Seconds a task runs before health checks apply to it.
    pub slow_worker_grace_period: u64,
    /// Seconds without any bytes before a task counts as stalled.
    pub stall_timeout: u64,
    /// Smoothing factor for speed estimates.
    pub speed_ema_alpha: f64,
    /// Overall timeout for the capability probe, seconds.
    pub probe_timeout: u64,
    /// TCP connect timeout per request, seconds.
    pub connect_timeout: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_connections_per_host: 32,
            max_global_connections: 64,
            max_parallel_downloads: 3,
            user_agent: "surge/0.1".to_string(),
            min_chunk_size: 64 * 1024,
            max_chunk_size: 32 * 1024 * 1024,
            target_chunk_size: 0,
            worker_buffer_size: 16 * 1024,
            max_task_retries: 4,
            slow_worker_threshold: 0.5,
            slow_worker_grace_period: 10,
            stall_timeout: 30,
            speed_ema_alpha: 0.3,
            probe_timeout: 15,
            connect_timeout: 15,
        }
    }
}

impl RuntimeConfig {
    /// Returns a copy with every zero/empty field replaced by its default and
    /// internal consistency enforced. `target_chunk_size` is the one field
    /// where zero is meaningful (auto).
    pub fn normalized(&self) -> Self {
        let d = Self::default();
        let mut cfg = self.clone();
        if cfg.max_connections_per_host == 0 {
            cfg.max_connections_per_host = d.max_connections_per_host;
        }
        if cfg.max_global_connections == 0 {
            cfg.max_global_connections = d.max_global_connections;
        }
        if cfg.max_parallel_downloads == 0 {
            cfg.max_parallel_downloads = d.max_parallel_downloads;
        }
        if cfg.user_agent.is_empty() {
            cfg.user_agent = d.user_agent;
        }
        if cfg.worker_buffer_size == 0 {
            cfg.worker_buffer_size = d.worker_buffer_size;
        }
        if cfg.min_chunk_size == 0 {
            cfg.min_chunk_size = d.min_chunk_size;
        }
        // A steal point must stay at least one in-flight buffer ahead of the
        // victim's writer; 4x leaves margin.
        cfg.min_chunk_size = cfg.min_chunk_size.max(4 * cfg.worker_buffer_size as u64);
        if cfg.max_chunk_size == 0 {
            cfg.max_chunk_size = d.max_chunk_size;
        }
        cfg.max_chunk_size = cfg.max_chunk_size.max(cfg.min_chunk_size);
        if cfg.max_task_retries == 0 {
            cfg.max_task_retries = d.max_task_retries;
        }
        if cfg.slow_worker_threshold <= 0.0 || cfg.slow_worker_threshold >= 1.0 {
            cfg.slow_worker_threshold = d.slow_worker_threshold;
        }
        if cfg.slow_worker_grace_period == 0 {
            cfg.slow_worker_grace_period = d.slow_worker_grace_period;
        }
        if cfg.stall_timeout == 0 {
            cfg.stall_timeout = d.stall_timeout;
        }
        if cfg.speed_ema_alpha <= 0.0 || cfg.speed_ema_alpha > 1.0 {
            cfg.speed_ema_alpha = d.speed_ema_alpha;
        }
        if cfg.probe_timeout == 0 {
            cfg.probe_timeout = d.probe_timeout;
        }
        if cfg.connect_timeout == 0 {
            cfg.connect_timeout = d.connect_timeout;
        }
        cfg
    }

    /// Initial connection count for a file of the given size, before the
    /// per-host clamp.
    pub fn connections_for(&self, file_size: u64) -> usize {
        const MB: u64 = 1024 * 1024;
        let n = if file_size < 10 * MB {
            1
        } else if file_size < 100 * MB {
            4
        } else if file_size < 1024 * MB {
            6
        } else {
            32
        };
        n.min(self.max_connections_per_host).max(1)
    }

    /// Initial chunk size for `connections` workers over `file_size` bytes,
    /// clamped to `[min_chunk_size, max_chunk_size]` and aligned down.
    pub fn chunk_size(&self, file_size: u64, connections: usize) -> u64 {
        let base = if self.target_chunk_size > 0 {
            self.target_chunk_size
        } else {
            file_size / (connections.max(1) as u64 * TASKS_PER_WORKER)
        };
        let clamped = base.clamp(self.min_chunk_size, self.max_chunk_size);
        align_down(clamped).max(self.min_chunk_size)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.slow_worker_grace_period)
    }

    pub fn stall(&self) -> Duration {
        Duration::from_secs(self.stall_timeout)
    }

    pub fn probe_deadline(&self) -> Duration {
        Duration::from_secs(self.probe_timeout)
    }

    pub fn connect_deadline(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("surge")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<RuntimeConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = RuntimeConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: RuntimeConfig = toml::from_str(&data)?;
    Ok(cfg.normalized())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_self_consistent() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.normalized().min_chunk_size, cfg.min_chunk_size);
        assert!(cfg.min_chunk_size >= 4 * cfg.worker_buffer_size as u64);
        assert!(cfg.max_chunk_size >= cfg.min_chunk_size);
    }

    #[test]
    fn zero_fields_get_defaults() {
        let cfg: RuntimeConfig = toml::from_str("max_task_retries = 0\nuser_agent = \"\"").unwrap();
        let n = cfg.normalized();
        assert_eq!(n.max_task_retries, RuntimeConfig::default().max_task_retries);
        assert_eq!(n.user_agent, RuntimeConfig::default().user_agent);
    }

    #[test]
    fn toml_roundtrip() {
        let cfg = RuntimeConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: RuntimeConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.max_connections_per_host, cfg.max_connections_per_host);
        assert_eq!(parsed.min_chunk_size, cfg.min_chunk_size);
        assert_eq!(parsed.user_agent, cfg.user_agent);
    }

    #[test]
    fn connection_count_tiers() {
        let cfg = RuntimeConfig::default();
        const MB: u64 = 1024 * 1024;
        assert_eq!(cfg.connections_for(MB), 1);
        assert_eq!(cfg.connections_for(50 * MB), 4);
        assert_eq!(cfg.connections_for(500 * MB), 6);
        assert_eq!(cfg.connections_for(2048 * MB), 32);
    }

    #[test]
    fn connection_count_clamped_per_host() {
        let cfg = RuntimeConfig {
            max_connections_per_host: 8,
            ..Default::default()
        };
        assert_eq!(cfg.connections_for(2 * 1024 * 1024 * 1024), 8);
    }

    #[test]
    fn chunk_size_from_file_and_workers() {
        let cfg = RuntimeConfig::default();
        // 1 MiB across 4 workers, 4 tasks each: exactly min_chunk_size.
        assert_eq!(cfg.chunk_size(1_048_576, 4), 65_536);
        // Tiny file clamps up to the minimum.
        assert_eq!(cfg.chunk_size(10_000, 4), cfg.min_chunk_size);
        // Huge file clamps down to the maximum.
        assert_eq!(cfg.chunk_size(1 << 40, 2), cfg.max_chunk_size);
    }

    #[test]
    fn target_chunk_size_overrides_computed() {
        let cfg = RuntimeConfig {
            target_chunk_size: 128 * 1024,
            ..Default::default()
        };
        assert_eq!(cfg.chunk_size(1 << 30, 4), 128 * 1024);
    }
}
