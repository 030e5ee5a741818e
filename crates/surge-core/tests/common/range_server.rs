//! Minimal HTTP/1.1 server with Range support for integration tests.
//!
//! Serves a single static body, one request per connection. Behavior
//! switches cover the scenarios the engine must survive: servers without
//! range support, throttled links, and 429 rate limiting.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RangeServerOptions {
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    /// Respond 429 (with `retry_after` if set) to this many data requests
    /// (ranged GETs longer than one byte) before serving normally.
    pub rate_limit_first: usize,
    pub retry_after: Option<String>,
    /// Sleep this long after each `throttle_chunk` bytes written.
    pub throttle_delay: Option<Duration>,
    pub throttle_chunk: usize,
    /// Extra Content-Disposition header to send.
    pub content_disposition: Option<String>,
}

impl Default for RangeServerOptions {
    fn default() -> Self {
        Self {
            support_ranges: true,
            rate_limit_first: 0,
            retry_after: None,
            throttle_delay: None,
            throttle_chunk: 16 * 1024,
            content_disposition: None,
        }
    }
}

/// Starts a server in a background thread serving `body`. Returns the base
/// URL (e.g. `http://127.0.0.1:12345/`). Runs until the process exits.
pub fn start(body: Vec<u8>) -> String {
    start_with_options(body, RangeServerOptions::default())
}

pub fn start_with_options(body: Vec<u8>, opts: RangeServerOptions) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    let opts = Arc::new(opts);
    let limited = Arc::new(AtomicUsize::new(0));
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            let opts = Arc::clone(&opts);
            let limited = Arc::clone(&limited);
            thread::spawn(move || handle(stream, &body, &opts, &limited));
        }
    });
    format!("http://127.0.0.1:{port}/")
}

fn handle(
    mut stream: std::net::TcpStream,
    body: &[u8],
    opts: &RangeServerOptions,
    limited: &AtomicUsize,
) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));

    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let Ok(request) = std::str::from_utf8(&buf[..n]) else {
        return;
    };
    let (method, range) = parse_request(request);
    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n");
        return;
    }

    let total = body.len() as u64;

    // Rate-limit data requests (not the 1-byte probe).
    let is_data_request = matches!(range, Some((s, e)) if e > s);
    if is_data_request && limited.fetch_add(1, Ordering::SeqCst) < opts.rate_limit_first {
        let retry = opts
            .retry_after
            .as_deref()
            .map(|v| format!("Retry-After: {v}\r\n"))
            .unwrap_or_default();
        let _ = stream.write_all(
            format!("HTTP/1.1 429 Too Many Requests\r\n{retry}Content-Length: 0\r\nConnection: close\r\n\r\n").as_bytes(),
        );
        return;
    }

    let (status, content_range, slice) = if opts.support_ranges {
        match range {
            Some((start, end_incl)) => {
                let start = start.min(total);
                let end_incl = end_incl.min(total.saturating_sub(1));
                if start > end_incl {
                    ("416 Range Not Satisfiable", format!("bytes */{total}"), &body[0..0])
                } else {
                    let s = start as usize;
                    let e = (end_incl + 1) as usize;
                    (
                        "206 Partial Content",
                        format!("bytes {}-{}/{}", s, e - 1, total),
                        &body[s..e],
                    )
                }
            }
            None => ("200 OK", String::new(), body),
        }
    } else {
        ("200 OK", String::new(), body)
    };

    let mut headers = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n",
        slice.len()
    );
    if !content_range.is_empty() {
        headers.push_str(&format!("Content-Range: {content_range}\r\n"));
    }
    if opts.support_ranges {
        headers.push_str("Accept-Ranges: bytes\r\n");
    }
    if let Some(cd) = &opts.content_disposition {
        headers.push_str(&format!("Content-Disposition: {cd}\r\n"));
    }
    headers.push_str("\r\n");
    if stream.write_all(headers.as_bytes()).is_err() {
        return;
    }

    match opts.throttle_delay {
        Some(delay) => {
            for chunk in slice.chunks(opts.throttle_chunk.max(1)) {
                if stream.write_all(chunk).is_err() {
                    return;
                }
                let _ = stream.flush();
                thread::sleep(delay);
            }
        }
        None => {
            let _ = stream.write_all(slice);
        }
    }
}

/// Returns (method, optional (start, end_inclusive) for `Range: bytes=X-Y`).
fn parse_request(request: &str) -> (&str, Option<(u64, u64)>) {
    let mut method = "";
    let mut range = None;
    for line in request.lines() {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if method.is_empty() {
            method = line.split_whitespace().next().unwrap_or("");
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("range") {
                let value = value.trim();
                if let Some(bounds) = value.strip_prefix("bytes=") {
                    if let Some((a, b)) = bounds.split_once('-') {
                        let start = a.trim().parse::<u64>().unwrap_or(0);
                        let end = b.trim();
                        let end_incl = if end.is_empty() {
                            u64::MAX
                        } else {
                            end.parse::<u64>().unwrap_or(0)
                        };
                        range = Some((start, end_incl));
                    }
                }
            }
        }
    }
    (method, range)
}
