//! Fetch backend contract and adapters.
//!
//! The engine talks to every backend through [`Fetcher`]; adapters are
//! pure with respect to the store and the filesystem output — all side
//! effects on the mirror tree belong to the writer. Three adapters ship:
//! [`http::HttpFetcher`] (fast static HTML), [`browser::BrowserFetcher`]
//! (headless Chromium for script-heavy sites) and
//! [`mirror::MirrorFetcher`] (wraps an external site-mirror tool).

pub mod browser;
pub mod http;
pub mod mirror;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use thiserror::Error;
use url::Url;

pub use browser::BrowserFetcher;
pub use http::HttpFetcher;
pub use mirror::MirrorFetcher;

/// Options shared by every backend.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub user_agent: String,
    pub timeout: Duration,
    pub max_body_bytes: usize,
}

/// One fetched response, backend-agnostic.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub status_code: u16,
    /// Response headers, lowercased names, in arrival order.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// URL after redirects; link resolution and canonical comparison use this.
    pub final_url: Url,
    pub content_type: Option<String>,
    /// Charset declared in the Content-Type header, if any.
    pub encoding: Option<String>,
}

/// Failure taxonomy for one fetch attempt. `retryable()` drives the
/// scheduler's backoff; everything else is terminal for the URL.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("tls error: {0}")]
    Tls(String),
    #[error("HTTP {0}")]
    Http4xx(u16),
    #[error("HTTP {0}")]
    Http5xx(u16),
    #[error("blocked by robots.txt")]
    BlockedByRobots,
    #[error("ssrf blocked: {0}")]
    Ssrf(String),
    #[error("body exceeded {0} bytes")]
    Oversize(usize),
    #[error("unsupported content type: {0}")]
    UnsupportedType(String),
}

impl FetchError {
    /// Transient failures worth another attempt. HTTP 429 is the one 4xx
    /// that backs off and retries.
    pub fn retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout | Self::Http5xx(_) => true,
            Self::Http4xx(code) => *code == 429,
            _ => false,
        }
    }

    /// Short tag recorded into the per-URL error column.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Timeout => "timeout",
            Self::Tls(_) => "tls",
            Self::Http4xx(_) => "http4xx",
            Self::Http5xx(_) => "http5xx",
            Self::BlockedByRobots => "blockedByRobots",
            Self::Ssrf(_) => "ssrf",
            Self::Oversize(_) => "oversize",
            Self::UnsupportedType(_) => "unsupportedType",
        }
    }
}

/// Capability interface every backend implements.
///
/// The boxed-future shape keeps the trait object-safe so the engine can
/// hold `Box<dyn Fetcher>` chosen at runtime.
pub trait Fetcher: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<FetchResult, FetchError>>;

    /// Backend name for logs and the session config snapshot.
    fn name(&self) -> &'static str;
}

/// Which adapter `--scraper` selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    #[default]
    Http,
    Browser,
    Mirror,
}

impl Backend {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "http" | "httrack" | "static" => Ok(Self::Http),
            "browser" | "headless" => Ok(Self::Browser),
            "mirror" | "sitemirror" => Ok(Self::Mirror),
            other => anyhow::bail!("unknown scraper backend: {other}"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Browser => "browser",
            Self::Mirror => "mirror",
        }
    }
}

/// Build the configured backend. `scraper_config` is the optional JSON
/// options file passed with `--scraper-config`.
pub fn make_fetcher(
    backend: Backend,
    opts: FetchOptions,
    scraper_config: Option<&Path>,
) -> Result<Box<dyn Fetcher>> {
    match backend {
        Backend::Http => Ok(Box::new(HttpFetcher::new(opts)?)),
        Backend::Browser => Ok(Box::new(BrowserFetcher::new(opts))),
        Backend::Mirror => {
            let options = match scraper_config {
                Some(path) => {
                    let raw = std::fs::read_to_string(path).with_context(|| {
                        format!("failed to read scraper config {}", path.display())
                    })?;
                    serde_json::from_str(&raw).with_context(|| {
                        format!("invalid scraper config {}", path.display())
                    })?
                }
                None => mirror::MirrorOptions::default(),
            };
            Ok(Box::new(MirrorFetcher::new(opts, options)))
        }
    }
}

/// Charset parameter of a Content-Type header value, if present.
pub(crate) fn charset_of(content_type: &str) -> Option<String> {
    content_type
        .parse::<mime::Mime>()
        .ok()
        .and_then(|m| m.get_param(mime::CHARSET).map(|c| c.as_str().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_follows_the_taxonomy() {
        assert!(FetchError::Network("reset".into()).retryable());
        assert!(FetchError::Timeout.retryable());
        assert!(FetchError::Http5xx(503).retryable());
        assert!(FetchError::Http4xx(429).retryable());

        assert!(!FetchError::Http4xx(404).retryable());
        assert!(!FetchError::Tls("bad cert".into()).retryable());
        assert!(!FetchError::BlockedByRobots.retryable());
        assert!(!FetchError::Ssrf("private".into()).retryable());
        assert!(!FetchError::Oversize(1024).retryable());
        assert!(!FetchError::UnsupportedType("application/zip".into()).retryable());
    }

    #[test]
    fn backend_parsing() {
        assert_eq!(Backend::parse("http").unwrap(), Backend::Http);
        assert_eq!(Backend::parse("browser").unwrap(), Backend::Browser);
        assert_eq!(Backend::parse("mirror").unwrap(), Backend::Mirror);
        assert!(Backend::parse("curlx").is_err());
    }

    #[test]
    fn charset_extraction() {
        assert_eq!(
            charset_of("text/html; charset=ISO-8859-1").as_deref(),
            Some("ISO-8859-1")
        );
        assert_eq!(charset_of("text/html"), None);
    }
}
