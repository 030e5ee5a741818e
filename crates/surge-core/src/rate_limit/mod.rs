//! Per-host 429 coordination.
//!
//! One limiter per `(scheme, host, port)`; a process-wide registry hands the
//! same limiter to every worker of that host so a single 429 throttles them
//! all. The registry map is read-mostly: lookups take the read lock,
//! insertion double-checks under the write lock.

mod key;
mod limiter;
mod retry_after;

pub use key::HostKey;
pub use limiter::HostLimiter;
pub use retry_after::parse_retry_after;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use anyhow::Result;

/// Registry of host -> limiter, created on demand.
#[derive(Default)]
pub struct RateLimiters {
    hosts: RwLock<HashMap<HostKey, Arc<HostLimiter>>>,
}

impl RateLimiters {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> &'static RateLimiters {
        static GLOBAL: OnceLock<RateLimiters> = OnceLock::new();
        GLOBAL.get_or_init(RateLimiters::new)
    }

    /// Limiter for the given URL's host.
    pub fn for_url(&self, url: &str) -> Result<Arc<HostLimiter>> {
        Ok(self.for_host(HostKey::from_url(url)?))
    }

    /// Limiter for a host key, creating it on first use.
    pub fn for_host(&self, key: HostKey) -> Arc<HostLimiter> {
        if let Some(limiter) = self.hosts.read().unwrap().get(&key) {
            return Arc::clone(limiter);
        }
        let mut hosts = self.hosts.write().unwrap();
        Arc::clone(
            hosts
                .entry(key)
                .or_insert_with(|| Arc::new(HostLimiter::new())),
        )
    }
}
