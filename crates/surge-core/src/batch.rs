//! Batch URL list files: one URL per line.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;

/// Parses a URL list. Empty lines and lines starting with `#` are skipped;
/// duplicates are dropped, compared with any trailing slash removed.
pub fn parse_url_list(input: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for line in input.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let key = line.trim_end_matches('/').to_string();
        if seen.insert(key) {
            out.push(line.to_string());
        }
    }
    out
}

/// Reads and parses a URL list file.
pub fn read_url_file(path: &Path) -> Result<Vec<String>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read URL list: {}", path.display()))?;
    Ok(parse_url_list(&data))
}
