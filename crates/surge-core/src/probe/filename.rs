//! Canonical filename determination.
//!
//! Priority: Content-Disposition, then `filename`/`file` query parameters,
//! then the URL's last path segment. When that yields nothing usable the
//! first body bytes are consulted (ZIP local-header name, then extension
//! sniffing), with `download.bin` as the final fallback.

use std::path::Path;

use super::content_disposition::{filename_from_header, percent_decode};
use super::sanitize::sanitize_filename;

const FALLBACK: &str = "download.bin";

/// Best candidate available from headers and the URL alone, sanitized.
pub(super) fn candidate_from_headers(
    url: &str,
    content_disposition: Option<&str>,
) -> Option<String> {
    content_disposition
        .and_then(filename_from_header)
        .or_else(|| query_param_filename(url))
        .or_else(|| last_path_segment(url))
        .map(|raw| sanitize_filename(&raw))
        .filter(|s| !s.is_empty())
}

/// Whether body bytes are needed to finish the decision.
pub(super) fn needs_body(candidate: Option<&str>) -> bool {
    match candidate {
        None => true,
        Some(c) => c == "." || Path::new(c).extension().is_none(),
    }
}

/// Completes the decision using up to 512 body bytes.
pub(super) fn refine_with_body(candidate: Option<String>, body: &[u8]) -> String {
    let mut name = candidate.unwrap_or_default();

    if name.is_empty() || name == "." {
        match zip_entry_name(body) {
            Some(zip) => name = sanitize_filename(&zip),
            None => name.clear(),
        }
    }

    if !name.is_empty() && Path::new(&name).extension().is_none() {
        if let Some(ext) = sniff_extension(body) {
            name = format!("{name}.{ext}");
        }
    }

    if name.is_empty() {
        name = FALLBACK.to_string();
    }
    name
}

fn query_param_filename(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    for key in ["filename", "file"] {
        if let Some((_, v)) = parsed.query_pairs().find(|(k, _)| k == key) {
            if !v.is_empty() {
                return Some(v.into_owned());
            }
        }
    }
    None
}

fn last_path_segment(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .next_back()?;
    let decoded = percent_decode(segment);
    if decoded.is_empty() || decoded == ".." {
        return None;
    }
    Some(decoded)
}

/// Name of the first entry of a ZIP body: signature `PK\x03\x04`, name
/// length at bytes 26-27 (LE), name starting at byte 30.
fn zip_entry_name(body: &[u8]) -> Option<String> {
    if body.len() < 30 || !body.starts_with(b"PK\x03\x04") {
        return None;
    }
    let name_len = u16::from_le_bytes([body[26], body[27]]) as usize;
    if name_len == 0 || body.len() < 30 + name_len {
        return None;
    }
    let name = String::from_utf8_lossy(&body[30..30 + name_len]).into_owned();
    Some(name)
}

/// Extension guess from leading magic bytes.
fn sniff_extension(body: &[u8]) -> Option<&'static str> {
    if body.starts_with(b"PK\x03\x04") {
        return Some("zip");
    }
    if body.starts_with(&[0x1F, 0x8B]) {
        return Some("gz");
    }
    if body.starts_with(b"%PDF") {
        return Some("pdf");
    }
    if body.starts_with(&[0x89, b'P', b'N', b'G']) {
        return Some("png");
    }
    if body.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("jpg");
    }
    if body.starts_with(b"GIF8") {
        return Some("gif");
    }
    if body.starts_with(b"7z\xBC\xAF\x27\x1C") {
        return Some("7z");
    }
    if body.starts_with(b"Rar!") {
        return Some("rar");
    }
    if body.len() >= 8 && &body[4..8] == b"ftyp" {
        return Some("mp4");
    }
    if body.len() >= 262 && &body[257..262] == b"ustar" {
        return Some("tar");
    }
    if body.starts_with(b"ID3") {
        return Some("mp3");
    }
    if body.starts_with(b"RIFF") && body.len() >= 12 && &body[8..12] == b"WEBP" {
        return Some("webp");
    }
    if body.starts_with(b"OggS") {
        return Some("ogg");
    }

    let head = String::from_utf8_lossy(&body[..body.len().min(256)]);
    let head = head.trim_start().to_ascii_lowercase();
    if head.starts_with("<!doctype html") || head.starts_with("<html") {
        return Some("html");
    }
    if head.starts_with("<?xml") {
        return Some("xml");
    }
    None
}
