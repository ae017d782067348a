//! webmirror: a resumable website mirroring crawler.
//!
//! The engine downloads pages through pluggable fetch backends, applies
//! per-host politeness and robots.txt rules, deduplicates three ways (URL
//! identity, canonical URL, content checksum), materializes pages under a
//! host-mirrored directory layout with sidecar metadata, and tracks every
//! attempt in a SQLite store so an interrupted crawl can resume where it
//! stopped.

pub mod cli;
pub mod config;
pub mod dedup;
pub mod extract;
pub mod fetch;
pub mod robots;
pub mod safety;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod urlnorm;
pub mod writer;

pub use config::CrawlConfig;
pub use dedup::{DedupEngine, DedupOptions, PostFetchDecision, PreFetchDecision};
pub use extract::PageData;
pub use fetch::{Backend, FetchError, FetchOptions, FetchResult, Fetcher};
pub use robots::{RobotsCache, RobotsVerdict};
pub use scheduler::{CrawlTotals, Scheduler};
pub use session::{CrawlError, CrawlSummary, Maintenance, SessionController};
pub use store::{ScrapedUrlRow, SessionRow, SessionStatus, Store};
pub use writer::{PageMetadata, Writer};
