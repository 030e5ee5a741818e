//! Host identity for rate limiting.

use anyhow::{Context, Result};

/// Identifies a host for throttling purposes: `(scheme, host, port)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostKey {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl HostKey {
    pub fn from_url(raw: &str) -> Result<Self> {
        let parsed = url::Url::parse(raw).with_context(|| format!("invalid URL: {raw}"))?;
        let host = parsed
            .host_str()
            .with_context(|| format!("URL has no host: {raw}"))?
            .to_ascii_lowercase();
        let port = parsed
            .port_or_known_default()
            .with_context(|| format!("URL has no port: {raw}"))?;
        Ok(Self {
            scheme: parsed.scheme().to_string(),
            host,
            port,
        })
    }
}

impl std::fmt::Display for HostKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_explicit_port() {
        let key = HostKey::from_url("https://example.com:8443/path").unwrap();
        assert_eq!(key.scheme, "https");
        assert_eq!(key.host, "example.com");
        assert_eq!(key.port, 8443);
    }

    #[test]
    fn default_ports() {
        assert_eq!(HostKey::from_url("http://example.com/").unwrap().port, 80);
        assert_eq!(HostKey::from_url("https://example.com/").unwrap().port, 443);
    }

    #[test]
    fn host_is_case_insensitive() {
        let a = HostKey::from_url("https://CDN.Example.COM/x").unwrap();
        let b = HostKey::from_url("https://cdn.example.com/y").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_hostless_urls() {
        assert!(HostKey::from_url("not a url").is_err());
    }
}
