//! Probe response header parsing.

/// Header fields the probe cares about, taken from the final response when
/// redirects were followed (each status line resets the collected state).
#[derive(Debug, Default)]
pub(super) struct ProbeHeaders {
    pub content_length: Option<u64>,
    /// Total size from `Content-Range: bytes 0-0/TOTAL`; `Some(0)` when the
    /// denominator is `*`.
    pub content_range_total: Option<u64>,
    pub content_disposition: Option<String>,
    pub content_type: Option<String>,
}

pub(super) fn parse_probe_headers(lines: &[String]) -> ProbeHeaders {
    let mut h = ProbeHeaders::default();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with("HTTP/") {
            // A redirect's headers must not leak into the final response.
            h = ProbeHeaders::default();
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            h.content_length = value.parse::<u64>().ok();
        } else if name.eq_ignore_ascii_case("content-range") {
            h.content_range_total = parse_content_range_total(value);
        } else if name.eq_ignore_ascii_case("content-disposition") {
            h.content_disposition = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("content-type") {
            h.content_type = Some(value.to_string());
        }
    }
    h
}

/// Parses the total out of `bytes <from>-<to>/<total>`. An unknown total
/// (`*`) maps to 0.
pub(super) fn parse_content_range_total(value: &str) -> Option<u64> {
    let rest = value.trim().strip_prefix("bytes")?.trim();
    let (_, total) = rest.split_once('/')?;
    let total = total.trim();
    if total == "*" {
        return Some(0);
    }
    total.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn partial_content_total() {
        let h = parse_probe_headers(&lines(&[
            "HTTP/1.1 206 Partial Content",
            "Content-Range: bytes 0-0/1048576",
            "Content-Type: application/octet-stream",
        ]));
        assert_eq!(h.content_range_total, Some(1_048_576));
        assert_eq!(h.content_type.as_deref(), Some("application/octet-stream"));
    }

    #[test]
    fn unknown_total_is_zero() {
        assert_eq!(parse_content_range_total("bytes 0-0/*"), Some(0));
    }

    #[test]
    fn malformed_content_range() {
        assert_eq!(parse_content_range_total("items 0-0/10"), None);
        assert_eq!(parse_content_range_total("bytes 0-0"), None);
    }

    #[test]
    fn plain_response_content_length() {
        let h = parse_probe_headers(&lines(&[
            "HTTP/1.1 200 OK",
            "Content-Length: 999",
            "Accept-Ranges: none",
        ]));
        assert_eq!(h.content_length, Some(999));
        assert_eq!(h.content_range_total, None);
    }

    #[test]
    fn redirect_headers_are_discarded() {
        let h = parse_probe_headers(&lines(&[
            "HTTP/1.1 302 Found",
            "Content-Length: 185",
            "Location: https://cdn.example.com/file.bin",
            "",
            "HTTP/1.1 206 Partial Content",
            "Content-Range: bytes 0-0/4096",
        ]));
        assert_eq!(h.content_length, None);
        assert_eq!(h.content_range_total, Some(4096));
    }

    #[test]
    fn header_names_are_case_insensitive() {
        let h = parse_probe_headers(&lines(&[
            "content-disposition: attachment; filename=\"a.bin\"",
        ]));
        assert!(h.content_disposition.is_some());
    }
}
