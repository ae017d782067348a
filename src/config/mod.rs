//! Crawl configuration: a value threaded through every constructor.

mod builder;
mod types;

pub use builder::{CrawlConfigBuilder, WithOutputDir, WithStartUrl};
pub use types::CrawlConfig;
