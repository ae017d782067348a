//! The `CrawlConfig` struct and its accessors.

use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;

use crate::dedup::DedupOptions;
use crate::fetch::Backend;

/// Main configuration for one crawl run.
///
/// Built through [`CrawlConfig::builder`]; `output_dir` and `start_url`
/// are enforced at the type level, everything else has defaults.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub(crate) output_dir: PathBuf,
    /// Normalized start URL; always admitted regardless of path rules.
    pub(crate) start_url: Url,
    pub(crate) max_depth: u32,
    /// `-1` means unbounded.
    pub(crate) max_pages: i64,
    /// Path prefixes (on the start host) links must match. Derived from
    /// the start URL's directory when none are given.
    pub(crate) allowed_paths: Vec<String>,
    pub(crate) request_delay: Duration,
    pub(crate) concurrent_requests: usize,
    pub(crate) user_agent: String,
    pub(crate) timeout: Duration,
    pub(crate) retry_count: u32,
    pub(crate) max_body_bytes: usize,
    /// How many previously scraped pages are re-read to rebuild the
    /// frontier on resume.
    pub(crate) resume_scan_limit: i64,
    pub(crate) backend: Backend,
    pub(crate) scraper_config: Option<PathBuf>,
    pub(crate) ignore_get_params: bool,
    pub(crate) dedup: DedupOptions,
    /// SSRF gate enabled unless explicitly opted out.
    pub(crate) ssrf_check: bool,
}

impl CrawlConfig {
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn start_url(&self) -> &Url {
        &self.start_url
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Page budget, `None` when unbounded.
    pub fn max_pages(&self) -> Option<u64> {
        (self.max_pages >= 0).then_some(self.max_pages as u64)
    }

    pub fn allowed_paths(&self) -> &[String] {
        &self.allowed_paths
    }

    pub fn request_delay(&self) -> Duration {
        self.request_delay
    }

    pub fn concurrent_requests(&self) -> usize {
        self.concurrent_requests
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    pub fn resume_scan_limit(&self) -> i64 {
        self.resume_scan_limit
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn scraper_config(&self) -> Option<&Path> {
        self.scraper_config.as_deref()
    }

    pub fn ignore_get_params(&self) -> bool {
        self.ignore_get_params
    }

    pub fn dedup(&self) -> DedupOptions {
        self.dedup
    }

    pub fn ssrf_check(&self) -> bool {
        self.ssrf_check
    }

    /// Whether a discovered URL falls inside the crawl's path restriction.
    /// The seed itself bypasses this check at admission.
    pub fn is_path_allowed(&self, url: &Url) -> bool {
        if url.host_str() != self.start_url.host_str() || url.port() != self.start_url.port() {
            return false;
        }
        let path = url.path();
        self.allowed_paths.iter().any(|prefix| {
            path.starts_with(prefix.as_str()) || path == prefix.trim_end_matches('/')
        })
    }

    /// JSON snapshot of the knobs worth remembering per session.
    pub fn snapshot_json(&self) -> String {
        serde_json::json!({
            "start_url": self.start_url.as_str(),
            "output_dir": self.output_dir.display().to_string(),
            "max_depth": self.max_depth,
            "max_pages": self.max_pages,
            "allowed_paths": self.allowed_paths,
            "request_delay_secs": self.request_delay.as_secs_f64(),
            "concurrent_requests": self.concurrent_requests,
            "user_agent": self.user_agent,
            "timeout_secs": self.timeout.as_secs_f64(),
            "retry_count": self.retry_count,
            "max_body_bytes": self.max_body_bytes,
            "resume_scan_limit": self.resume_scan_limit,
            "scraper": self.backend.as_str(),
            "ignore_get_params": self.ignore_get_params,
            "force_rescrape": self.dedup.force_rescrape,
            "ignore_canonical": self.dedup.ignore_canonical,
            "ignore_duplicates": self.dedup.ignore_duplicates,
            "ssrf_check": self.ssrf_check,
        })
        .to_string()
    }
}

/// Directory prefix of a URL path: `/api/index.html` -> `/api/`,
/// `/a` -> `/`, `/` -> `/`.
pub(crate) fn path_directory(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..=idx].to_string(),
        None => "/".to_string(),
    }
}
