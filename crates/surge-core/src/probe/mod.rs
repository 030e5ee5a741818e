//! Server capability probe.
//!
//! One GET with `Range: bytes=0-0` learns the file size, whether the server
//! honors byte ranges, the content type, and a canonical filename. Body
//! bytes received during probing are drained and discarded; when filename
//! detection needs magic bytes, a second small ranged GET fetches the first
//! 512 bytes.

mod content_disposition;
mod filename;
mod parse;
mod sanitize;

pub use sanitize::sanitize_filename;

use std::str;
use std::time::Duration;

use crate::config::RuntimeConfig;
use crate::error::DownloadError;

/// What the probe learned about the server and resource.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    /// Total size in bytes; 0 when the server did not reveal it.
    pub file_size: u64,
    /// True iff the server answered the ranged request with 206.
    pub supports_range: bool,
    /// Canonical filename, sanitized, never empty.
    pub filename: String,
    /// Raw Content-Type value; opaque to the engine.
    pub content_type: String,
}

/// One initial attempt plus up to 3 retries.
const PROBE_MAX_ATTEMPTS: u32 = 4;
const PROBE_BACKOFF: Duration = Duration::from_secs(1);
/// Bytes fetched for magic-byte sniffing when headers give no usable name.
const SNIFF_LEN: usize = 512;

/// Probes `url`, retrying transport failures up to 3 times with a fixed
/// 1 s backoff.
pub fn probe(url: &str, cfg: &RuntimeConfig) -> Result<ProbeResult, DownloadError> {
    let mut attempt = 0u32;
    loop {
        match probe_once(url, cfg) {
            Ok(result) => {
                tracing::debug!(
                    url,
                    size = result.file_size,
                    ranges = result.supports_range,
                    filename = %result.filename,
                    "probe complete"
                );
                return Ok(result);
            }
            Err(e) => {
                attempt += 1;
                if attempt >= PROBE_MAX_ATTEMPTS {
                    return Err(e);
                }
                tracing::debug!(url, attempt, error = %e, "probe attempt failed");
                std::thread::sleep(PROBE_BACKOFF);
            }
        }
    }
}

fn probe_once(url: &str, cfg: &RuntimeConfig) -> Result<ProbeResult, DownloadError> {
    let mut header_lines: Vec<String> = Vec::new();
    // Servers ignoring the range answer 200 with the whole file; cap how
    // much of that we are willing to drain before cutting the transfer.
    let mut drained = 0usize;
    let mut truncated = false;
    const DRAIN_LIMIT: usize = 64 * 1024;

    let mut easy = curl::easy::Easy::new();
    easy.url(url).map_err(probe_io)?;
    easy.useragent(&cfg.user_agent).map_err(probe_io)?;
    easy.range("0-0").map_err(probe_io)?;
    easy.follow_location(true).map_err(probe_io)?;
    easy.max_redirections(10).map_err(probe_io)?;
    easy.connect_timeout(cfg.connect_deadline()).map_err(probe_io)?;
    easy.timeout(cfg.probe_deadline()).map_err(probe_io)?;

    let perform_result = {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|data| {
                if let Ok(s) = str::from_utf8(data) {
                    header_lines.push(s.trim_end().to_string());
                }
                true
            })
            .map_err(probe_io)?;
        // Drain and discard the body, up to the cap.
        transfer
            .write_function(|data| {
                drained += data.len();
                if drained > DRAIN_LIMIT {
                    truncated = true;
                    return Ok(0);
                }
                Ok(data.len())
            })
            .map_err(probe_io)?;
        transfer.perform()
    };
    if let Err(e) = perform_result {
        if !truncated {
            return Err(probe_io(e));
        }
    }

    let status = easy.response_code().map_err(probe_io)?;
    let headers = parse::parse_probe_headers(&header_lines);

    let (file_size, supports_range) = match status {
        206 => (headers.content_range_total.unwrap_or(0), true),
        200 => (headers.content_length.unwrap_or(0), false),
        status => return Err(DownloadError::ProbeFailed { status }),
    };

    let candidate = filename::candidate_from_headers(url, headers.content_disposition.as_deref());
    let filename = match candidate {
        Some(name) if !filename::needs_body(Some(name.as_str())) => name,
        candidate => {
            let body = fetch_prefix(url, cfg).unwrap_or_default();
            filename::refine_with_body(candidate, &body)
        }
    };

    Ok(ProbeResult {
        file_size,
        supports_range,
        filename,
        content_type: headers.content_type.unwrap_or_default(),
    })
}

/// Fetches up to the first 512 bytes of the resource for sniffing.
/// Best effort: any failure just disables body-based detection.
fn fetch_prefix(url: &str, cfg: &RuntimeConfig) -> Option<Vec<u8>> {
    let mut body: Vec<u8> = Vec::with_capacity(SNIFF_LEN);

    let mut easy = curl::easy::Easy::new();
    easy.url(url).ok()?;
    easy.useragent(&cfg.user_agent).ok()?;
    easy.range(&format!("0-{}", SNIFF_LEN - 1)).ok()?;
    easy.follow_location(true).ok()?;
    easy.max_redirections(10).ok()?;
    easy.connect_timeout(cfg.connect_deadline()).ok()?;
    easy.timeout(cfg.probe_deadline()).ok()?;

    {
        let mut transfer = easy.transfer();
        transfer
            .write_function(|data| {
                let take = (SNIFF_LEN - body.len()).min(data.len());
                body.extend_from_slice(&data[..take]);
                // A short count aborts the transfer once the prefix is full;
                // servers ignoring the range would otherwise stream the file.
                Ok(take)
            })
            .ok()?;
        // Aborting on a full buffer surfaces as a write error; the bytes we
        // collected are still valid.
        let _ = transfer.perform();
    }

    let status = easy.response_code().ok()?;
    if status != 200 && status != 206 {
        return None;
    }
    if body.is_empty() {
        None
    } else {
        Some(body)
    }
}

fn probe_io(e: curl::Error) -> DownloadError {
    DownloadError::ProbeIo(e.to_string())
}
