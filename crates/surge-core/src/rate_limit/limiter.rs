//! One host's throttle state.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use rand::Rng;

use super::retry_after::parse_retry_after;

/// Backoff never exceeds this, regardless of hit count.
const MAX_BACKOFF: Duration = Duration::from_secs(60);
/// Exponent stops growing after this many consecutive 429s (caps at 32 s).
const BACKOFF_CAP_HITS: u32 = 5;
/// Uniform jitter applied to every computed wait.
const JITTER: f64 = 0.10;

/// Throttle state for a single host. All workers targeting the host call
/// [`HostLimiter::wait_if_blocked`] before each request and route every 429
/// through [`HostLimiter::handle_429`].
pub struct HostLimiter {
    /// Reference point for `blocked_until` nanos.
    epoch: Instant,
    /// Consecutive 429s without an intervening success.
    hits: AtomicU32,
    /// Nanoseconds since `epoch` until which requests must wait; only ever
    /// extended, never shortened.
    blocked_until: AtomicU64,
}

impl Default for HostLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl HostLimiter {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            hits: AtomicU32::new(0),
            blocked_until: AtomicU64::new(0),
        }
    }

    fn now_nanos(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Records a 429. Prefers the server's `Retry-After`; otherwise uses
    /// exponential backoff 1, 2, 4, 8, 16, 32, 32, ... seconds. Either way
    /// the wait gets ±10 % jitter and extends `blocked_until` monotonically.
    /// Returns the wait applied.
    pub fn handle_429(&self, retry_after: Option<&str>) -> Duration {
        let hits = self.hits.fetch_add(1, Ordering::AcqRel) + 1;
        let base = retry_after
            .and_then(parse_retry_after)
            .unwrap_or_else(|| {
                let exp = hits.saturating_sub(1).min(BACKOFF_CAP_HITS);
                Duration::from_secs(1u64 << exp)
            })
            .min(MAX_BACKOFF);

        let factor = rand::thread_rng().gen_range(1.0 - JITTER..=1.0 + JITTER);
        let wait = base.mul_f64(factor);

        let until = self.now_nanos().saturating_add(wait.as_nanos() as u64);
        let mut current = self.blocked_until.load(Ordering::Acquire);
        while until > current {
            match self.blocked_until.compare_exchange_weak(
                current,
                until,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        tracing::debug!(hits, wait_ms = wait.as_millis() as u64, "host rate limited");
        wait
    }

    /// Sleeps out any active block. Returns whether it slept.
    pub fn wait_if_blocked(&self) -> bool {
        let remaining = self.block_duration();
        if remaining.is_zero() {
            return false;
        }
        std::thread::sleep(remaining);
        true
    }

    /// Clears the consecutive-hit counter after a successful request.
    pub fn report_success(&self) {
        self.hits.store(0, Ordering::Release);
    }

    pub fn is_blocked(&self) -> bool {
        !self.block_duration().is_zero()
    }

    /// Time left until requests may flow again; zero when unblocked.
    pub fn block_duration(&self) -> Duration {
        let until = self.blocked_until.load(Ordering::Acquire);
        let now = self.now_nanos();
        if until > now {
            Duration::from_nanos(until - now)
        } else {
            Duration::ZERO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn within_jitter(wait: Duration, base_secs: f64) -> bool {
        let secs = wait.as_secs_f64();
        secs >= base_secs * (1.0 - JITTER) - 1e-6 && secs <= base_secs * (1.0 + JITTER) + 1e-6
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let limiter = HostLimiter::new();
        let expected = [1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 32.0, 32.0];
        for base in expected {
            let wait = limiter.handle_429(None);
            assert!(
                within_jitter(wait, base),
                "wait {:?} out of range for base {}s",
                wait,
                base
            );
        }
    }

    #[test]
    fn retry_after_overrides_backoff() {
        let limiter = HostLimiter::new();
        let wait = limiter.handle_429(Some("5"));
        assert!(within_jitter(wait, 5.0));
    }

    #[test]
    fn success_resets_hit_counter() {
        let limiter = HostLimiter::new();
        limiter.handle_429(None);
        limiter.handle_429(None);
        limiter.report_success();
        let wait = limiter.handle_429(None);
        assert!(within_jitter(wait, 1.0));
    }

    #[test]
    fn blocked_until_extends_but_never_shortens() {
        let limiter = HostLimiter::new();
        limiter.handle_429(Some("30"));
        let long_block = limiter.block_duration();
        assert!(long_block >= Duration::from_secs(26));

        // A shorter follow-up must not pull the block in.
        limiter.handle_429(Some("1"));
        let after = limiter.block_duration();
        assert!(after >= long_block - Duration::from_secs(1));
    }

    #[test]
    fn unblocked_by_default() {
        let limiter = HostLimiter::new();
        assert!(!limiter.is_blocked());
        assert!(!limiter.wait_if_blocked());
        assert_eq!(limiter.block_duration(), Duration::ZERO);
    }

    #[test]
    fn retry_after_longer_than_cap_is_trimmed() {
        let limiter = HostLimiter::new();
        let wait = limiter.handle_429(Some("3600"));
        assert!(wait <= MAX_BACKOFF.mul_f64(1.0 + JITTER));
    }
}
