//! Retry-After header parsing: delta-seconds or HTTP-date.

use std::time::{Duration, SystemTime};

/// Parses a `Retry-After` value into a wait duration. Accepts an integer
/// seconds form or an HTTP-date; a date in the past yields zero.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = httpdate::parse_http_date(value).ok()?;
    Some(
        when.duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO),
    )
}
