//! Typestate builder for `CrawlConfig`.
//!
//! Required fields are enforced by the type system: `output_dir` and then
//! `start_url` must be provided before `build()` becomes available. The
//! start URL is normalized at the `start_url` step, so an unusable URL
//! fails early.

use std::marker::PhantomData;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use url::Url;

use crate::dedup::DedupOptions;
use crate::fetch::Backend;
use crate::urlnorm;

use super::types::{CrawlConfig, path_directory};

const DEFAULT_MAX_DEPTH: u32 = 3;
const DEFAULT_CONCURRENT_REQUESTS: usize = 5;
const DEFAULT_REQUEST_DELAY: Duration = Duration::from_millis(500);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RETRY_COUNT: u32 = 3;
const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_RESUME_SCAN_LIMIT: i64 = 50;
const DEFAULT_USER_AGENT: &str = concat!("webmirror/", env!("CARGO_PKG_VERSION"));

// Type states.
pub struct WithOutputDir;
pub struct WithStartUrl;

pub struct CrawlConfigBuilder<State = ()> {
    output_dir: Option<PathBuf>,
    start_url: Option<Url>,
    max_depth: u32,
    max_pages: i64,
    allowed_path: Option<String>,
    allowed_paths: Option<Vec<String>>,
    request_delay: Duration,
    concurrent_requests: usize,
    user_agent: String,
    timeout: Duration,
    retry_count: u32,
    max_body_bytes: usize,
    resume_scan_limit: i64,
    backend: Backend,
    scraper_config: Option<PathBuf>,
    ignore_get_params: bool,
    dedup: DedupOptions,
    ssrf_check: bool,
    _state: PhantomData<State>,
}

impl Default for CrawlConfigBuilder<()> {
    fn default() -> Self {
        Self {
            output_dir: None,
            start_url: None,
            max_depth: DEFAULT_MAX_DEPTH,
            max_pages: -1,
            allowed_path: None,
            allowed_paths: None,
            request_delay: DEFAULT_REQUEST_DELAY,
            concurrent_requests: DEFAULT_CONCURRENT_REQUESTS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: DEFAULT_TIMEOUT,
            retry_count: DEFAULT_RETRY_COUNT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            resume_scan_limit: DEFAULT_RESUME_SCAN_LIMIT,
            backend: Backend::Http,
            scraper_config: None,
            ignore_get_params: false,
            dedup: DedupOptions::default(),
            ssrf_check: true,
            _state: PhantomData,
        }
    }
}

impl CrawlConfig {
    pub fn builder() -> CrawlConfigBuilder<()> {
        CrawlConfigBuilder::default()
    }
}

impl<State> CrawlConfigBuilder<State> {
    fn transition<Next>(self) -> CrawlConfigBuilder<Next> {
        CrawlConfigBuilder {
            output_dir: self.output_dir,
            start_url: self.start_url,
            max_depth: self.max_depth,
            max_pages: self.max_pages,
            allowed_path: self.allowed_path,
            allowed_paths: self.allowed_paths,
            request_delay: self.request_delay,
            concurrent_requests: self.concurrent_requests,
            user_agent: self.user_agent,
            timeout: self.timeout,
            retry_count: self.retry_count,
            max_body_bytes: self.max_body_bytes,
            resume_scan_limit: self.resume_scan_limit,
            backend: self.backend,
            scraper_config: self.scraper_config,
            ignore_get_params: self.ignore_get_params,
            dedup: self.dedup,
            ssrf_check: self.ssrf_check,
            _state: PhantomData,
        }
    }
}

impl CrawlConfigBuilder<()> {
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> CrawlConfigBuilder<WithOutputDir> {
        self.output_dir = Some(dir.into());
        self.transition()
    }
}

impl CrawlConfigBuilder<WithOutputDir> {
    /// Normalize and set the start URL. A scheme-less URL gets `https://`
    /// prepended before normalization.
    pub fn start_url(mut self, url: impl AsRef<str>) -> Result<CrawlConfigBuilder<WithStartUrl>> {
        let raw = url.as_ref();
        let with_scheme = if raw.starts_with("http://") || raw.starts_with("https://") {
            raw.to_string()
        } else {
            format!("https://{raw}")
        };
        let normalized = urlnorm::normalize(&with_scheme, None, false)?;
        self.start_url = Some(normalized);
        Ok(self.transition())
    }
}

impl CrawlConfigBuilder<WithStartUrl> {
    pub fn build(self) -> Result<CrawlConfig> {
        if self.allowed_path.is_some() && self.allowed_paths.is_some() {
            bail!("--allowed-path and --allowed-paths are mutually exclusive");
        }
        if self.concurrent_requests == 0 {
            bail!("concurrent_requests must be at least 1");
        }
        if self.max_pages < -1 {
            bail!("max_pages must be -1 (unbounded) or non-negative");
        }

        let output_dir = self
            .output_dir
            .ok_or_else(|| anyhow::anyhow!("output_dir is required"))?;
        let start_url = self
            .start_url
            .ok_or_else(|| anyhow::anyhow!("start_url is required"))?;

        let mut allowed_paths: Vec<String> = match (self.allowed_path, self.allowed_paths) {
            (Some(single), None) => vec![single],
            (None, Some(multi)) if !multi.is_empty() => multi,
            _ => vec![path_directory(start_url.path())],
        };
        for prefix in &mut allowed_paths {
            if !prefix.starts_with('/') {
                prefix.insert(0, '/');
            }
        }

        // The start URL needs the query preserved unless the whole crawl
        // drops GET parameters.
        let start_url = if self.ignore_get_params {
            urlnorm::normalize(start_url.as_str(), None, true)?
        } else {
            start_url
        };

        Ok(CrawlConfig {
            output_dir,
            start_url,
            max_depth: self.max_depth,
            max_pages: self.max_pages,
            allowed_paths,
            request_delay: self.request_delay,
            concurrent_requests: self.concurrent_requests,
            user_agent: self.user_agent,
            timeout: self.timeout,
            retry_count: self.retry_count,
            max_body_bytes: self.max_body_bytes,
            resume_scan_limit: self.resume_scan_limit,
            backend: self.backend,
            scraper_config: self.scraper_config,
            ignore_get_params: self.ignore_get_params,
            dedup: self.dedup,
            ssrf_check: self.ssrf_check,
        })
    }
}

// Optional knobs, available at any state.
impl<State> CrawlConfigBuilder<State> {
    pub fn max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    /// `-1` for unbounded.
    pub fn max_pages(mut self, pages: i64) -> Self {
        self.max_pages = pages;
        self
    }

    /// Legacy single path prefix.
    pub fn allowed_path(mut self, path: impl Into<String>) -> Self {
        self.allowed_path = Some(path.into());
        self
    }

    pub fn allowed_paths(mut self, paths: Vec<String>) -> Self {
        self.allowed_paths = Some(paths);
        self
    }

    pub fn request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    pub fn concurrent_requests(mut self, n: usize) -> Self {
        self.concurrent_requests = n;
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = ua.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry_count(mut self, retries: u32) -> Self {
        self.retry_count = retries;
        self
    }

    pub fn max_body_bytes(mut self, bytes: usize) -> Self {
        self.max_body_bytes = bytes;
        self
    }

    pub fn resume_scan_limit(mut self, limit: i64) -> Self {
        self.resume_scan_limit = limit;
        self
    }

    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn scraper_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.scraper_config = Some(path.into());
        self
    }

    pub fn ignore_get_params(mut self, ignore: bool) -> Self {
        self.ignore_get_params = ignore;
        self
    }

    pub fn dedup(mut self, options: DedupOptions) -> Self {
        self.dedup = options;
        self
    }

    pub fn ssrf_check(mut self, enabled: bool) -> Self {
        self.ssrf_check = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_defaults() {
        let cfg = CrawlConfig::builder()
            .output_dir("/tmp/out")
            .start_url("https://example.com/docs/")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(cfg.start_url().as_str(), "https://example.com/docs/");
        assert_eq!(cfg.max_depth(), DEFAULT_MAX_DEPTH);
        assert_eq!(cfg.max_pages(), None);
        assert_eq!(cfg.allowed_paths(), ["/docs/"]);
    }

    #[test]
    fn schemeless_start_url_gets_https() {
        let cfg = CrawlConfig::builder()
            .output_dir("/tmp/out")
            .start_url("example.com/a")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(cfg.start_url().as_str(), "https://example.com/a");
    }

    #[test]
    fn rejects_conflicting_path_options() {
        let err = CrawlConfig::builder()
            .output_dir("/tmp/out")
            .start_url("https://example.com/")
            .unwrap()
            .allowed_path("/a/")
            .allowed_paths(vec!["/b/".to_string()])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn rejects_bad_start_urls() {
        assert!(
            CrawlConfig::builder()
                .output_dir("/tmp/out")
                .start_url("ftp://example.com/")
                .is_err()
        );
    }

    #[test]
    fn rejects_zero_concurrency() {
        let err = CrawlConfig::builder()
            .output_dir("/tmp/out")
            .start_url("https://example.com/")
            .unwrap()
            .concurrent_requests(0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("concurrent_requests"));
    }

    #[test]
    fn ignore_get_params_strips_the_start_url_query() {
        let cfg = CrawlConfig::builder()
            .output_dir("/tmp/out")
            .start_url("https://example.com/p?utm=1")
            .unwrap()
            .ignore_get_params(true)
            .build()
            .unwrap();
        assert_eq!(cfg.start_url().as_str(), "https://example.com/p");
    }
}
