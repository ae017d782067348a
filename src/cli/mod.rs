//! Command-line surface.
//!
//! One binary, one invocation shape: a start URL plus an output directory
//! runs a crawl; the `--show-*` / `--clear-*` / `--cleanup-sessions`
//! flags run against the store and exit without crawling.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::config::CrawlConfig;
use crate::dedup::DedupOptions;
use crate::fetch::Backend;
use crate::session::CrawlError;

#[derive(Parser, Debug)]
#[command(
    name = "webmirror",
    version,
    about = "Resumable website mirroring crawler with durable session tracking"
)]
pub struct Args {
    /// URL to start crawling from.
    pub start_url: Option<String>,

    /// Directory the mirror and tracking database live in.
    #[arg(short = 'o', long)]
    pub output_dir: PathBuf,

    // ----- crawl -----
    /// Maximum link depth from the start URL.
    #[arg(long, default_value_t = 3)]
    pub max_depth: u32,

    /// Maximum pages to scrape; -1 means unbounded.
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub max_pages: i64,

    /// Single allowed path prefix (legacy form).
    #[arg(long, conflicts_with = "allowed_paths")]
    pub allowed_path: Option<String>,

    /// Allowed path prefixes; repeat the flag for each prefix.
    #[arg(long = "allowed-paths", action = clap::ArgAction::Append)]
    pub allowed_paths: Vec<String>,

    /// Base delay between requests to one host, in seconds.
    #[arg(long, default_value_t = 0.5)]
    pub request_delay: f64,

    /// Upper bound on fetches in flight across all hosts.
    #[arg(long, default_value_t = 5)]
    pub concurrent_requests: usize,

    /// User-Agent header for all traffic including robots.txt.
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Per-fetch deadline, in seconds.
    #[arg(long, default_value_t = 30.0)]
    pub timeout: f64,

    /// Retries for transient failures (network, timeout, 5xx, 429).
    #[arg(long, default_value_t = 3)]
    pub retry_count: u32,

    /// Maximum response body size in bytes; larger bodies fail as oversize.
    #[arg(long, default_value_t = 10 * 1024 * 1024)]
    pub max_body_size: usize,

    /// How many previously scraped pages to re-read when resuming.
    #[arg(long, default_value_t = 50)]
    pub resume_scan_limit: i64,

    // ----- backend -----
    /// Fetch backend: http, browser, or mirror.
    #[arg(long, default_value = "http")]
    pub scraper: String,

    /// JSON options file for the selected backend.
    #[arg(long)]
    pub scraper_config: Option<PathBuf>,

    // ----- dedup -----
    /// Strip query parameters during URL normalization.
    #[arg(long)]
    pub ignore_get_params: bool,

    /// Disable canonical-URL deduplication (D2).
    #[arg(long)]
    pub ignore_canonical: bool,

    /// Disable content-checksum deduplication (D3).
    #[arg(long)]
    pub ignore_duplicates: bool,

    /// Re-fetch URLs that already have successful rows (disables D1).
    #[arg(long)]
    pub force_rescrape: bool,

    /// Forget scraped URLs before crawling; checksums survive unless
    /// combined with --force-rescrape.
    #[arg(long)]
    pub clear_urls: bool,

    // ----- security -----
    /// Allow fetching private, loopback and metadata address space.
    #[arg(long)]
    pub disable_ssrf_check: bool,

    // ----- output / display -----
    /// Print every file written during this run.
    #[arg(long)]
    pub list_files: bool,

    /// Write scraped_urls.txt into the output directory after the crawl.
    #[arg(long)]
    pub save_urls: bool,

    /// Write scraped_files.txt into the output directory after the crawl.
    #[arg(long)]
    pub save_files: bool,

    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    #[arg(short, long)]
    pub quiet: bool,

    // ----- session / db -----
    #[arg(long)]
    pub show_db_stats: bool,

    #[arg(long)]
    pub show_errors: bool,

    #[arg(long)]
    pub show_scraped_urls: bool,

    #[arg(long)]
    pub show_sessions: bool,

    #[arg(long)]
    pub show_sessions_detailed: bool,

    /// Remove one session's rows from the database.
    #[arg(long, value_name = "ID")]
    pub clear_session: Option<i64>,

    #[arg(long)]
    pub clear_last_session: bool,

    /// Reclaim orphaned running sessions and drop empty ones.
    #[arg(long)]
    pub cleanup_sessions: bool,

    /// With --clear-session/--clear-last-session: also delete the files.
    #[arg(long)]
    pub delete_files: bool,
}

impl Args {
    /// Whether this invocation is store maintenance rather than a crawl.
    pub fn is_maintenance(&self) -> bool {
        self.show_db_stats
            || self.show_errors
            || self.show_scraped_urls
            || self.show_sessions
            || self.show_sessions_detailed
            || self.clear_session.is_some()
            || self.clear_last_session
            || self.cleanup_sessions
            || (self.clear_urls && self.start_url.is_none())
    }

    pub fn log_level(&self) -> log::LevelFilter {
        if self.quiet {
            log::LevelFilter::Error
        } else if self.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        }
    }

    /// Translate arguments into a validated `CrawlConfig`.
    pub fn to_config(&self) -> Result<CrawlConfig, CrawlError> {
        let start_url = self
            .start_url
            .as_deref()
            .ok_or_else(|| CrawlError::Config("a start URL is required".to_string()))?;

        let mut builder = CrawlConfig::builder()
            .output_dir(&self.output_dir)
            .start_url(start_url)
            .map_err(|e| CrawlError::Config(format!("{e:#}")))?
            .max_depth(self.max_depth)
            .max_pages(self.max_pages)
            .request_delay(Duration::from_secs_f64(self.request_delay.max(0.0)))
            .concurrent_requests(self.concurrent_requests)
            .timeout(Duration::from_secs_f64(self.timeout.max(0.1)))
            .retry_count(self.retry_count)
            .max_body_bytes(self.max_body_size)
            .resume_scan_limit(self.resume_scan_limit)
            .backend(
                Backend::parse(&self.scraper).map_err(|e| CrawlError::Config(format!("{e:#}")))?,
            )
            .ignore_get_params(self.ignore_get_params)
            .ssrf_check(!self.disable_ssrf_check)
            .dedup(DedupOptions {
                force_rescrape: self.force_rescrape,
                ignore_canonical: self.ignore_canonical,
                ignore_duplicates: self.ignore_duplicates,
            });

        if let Some(user_agent) = &self.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        if let Some(path) = &self.allowed_path {
            builder = builder.allowed_path(path.clone());
        }
        if !self.allowed_paths.is_empty() {
            builder = builder.allowed_paths(self.allowed_paths.clone());
        }
        if let Some(path) = &self.scraper_config {
            builder = builder.scraper_config(path.clone());
        }

        builder.build().map_err(|e| CrawlError::Config(format!("{e:#}")))
    }
}
