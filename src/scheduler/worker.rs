//! Per-URL processing pipeline.
//!
//! A worker takes one frontier entry through safety gates, robots, fetch,
//! extraction, dedup and the writer, and reports a single outcome back to
//! the coordinator. Workers never touch the frontier or host map; the
//! store is the only shared sink they write to.
//!
//! Cancellation is checked before the fetch, after the fetch, and before
//! every store write.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use sha2::Digest;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::CrawlConfig;
use crate::dedup::{DedupEngine, PostFetchDecision, PreFetchDecision};
use crate::extract;
use crate::fetch::{FetchError, Fetcher};
use crate::robots::RobotsCache;
use crate::safety;
use crate::store::{ScrapedUrlRow, Store};
use crate::writer::{PageMetadata, Writer};

use super::frontier::FrontierEntry;

/// Shared dependencies for every worker, cloned once per dispatch.
pub(crate) struct WorkerContext {
    pub config: CrawlConfig,
    pub store: Store,
    pub fetcher: Box<dyn Fetcher>,
    pub robots: RobotsCache,
    pub dedup: DedupEngine,
    pub writer: Writer,
    pub cancel: CancellationToken,
    pub session_id: i64,
}

/// What the coordinator should do with a processed URL.
pub(crate) enum UrlOutcome {
    /// Fetched (or dedup-resolved) successfully. `written` is the relative
    /// path when the page was materialized.
    Done {
        links: Vec<Url>,
        written: Option<PathBuf>,
    },
    /// D1 hit: nothing fetched, nothing recorded.
    SkippedPreFetch,
    /// D2 hit: row recorded; enqueue the canonical when newly seen.
    Canonical { canonical: Url, newly_seen: bool },
    /// Transient failure, eligible for another attempt.
    Retry { error: FetchError },
    /// Terminal failure, row recorded with the error string.
    Failed {
        error: String,
        /// Safety-gate failures on the seed abort the whole session.
        safety_blocked: bool,
    },
    /// Cancellation observed; result discarded, nothing recorded.
    Cancelled,
}

pub(crate) struct WorkerReport {
    pub entry: FrontierEntry,
    pub outcome: UrlOutcome,
    /// Robots crawl-delay hint for this host, surfaced to the host map.
    pub crawl_delay: Option<std::time::Duration>,
}

/// Whether this entry is the crawl seed (which bypasses path restriction
/// and whose safety failures are fatal for the session).
pub(crate) fn is_seed(config: &CrawlConfig, entry: &FrontierEntry) -> bool {
    entry.depth == 0 && entry.key == config.start_url().as_str()
}

pub(crate) async fn process_url(ctx: Arc<WorkerContext>, entry: FrontierEntry) -> WorkerReport {
    let mut crawl_delay = None;
    let outcome = run_pipeline(&ctx, &entry, &mut crawl_delay).await;
    WorkerReport { entry, outcome, crawl_delay }
}

async fn run_pipeline(
    ctx: &WorkerContext,
    entry: &FrontierEntry,
    crawl_delay: &mut Option<std::time::Duration>,
) -> UrlOutcome {
    if ctx.cancel.is_cancelled() {
        return UrlOutcome::Cancelled;
    }

    // D1: cheap identity check against the store.
    match ctx.dedup.check_before_fetch(&entry.key).await {
        Ok(PreFetchDecision::AlreadyScraped) => return UrlOutcome::SkippedPreFetch,
        Ok(PreFetchDecision::Proceed) => {}
        Err(e) => {
            return UrlOutcome::Failed {
                error: format!("store: {e}"),
                safety_blocked: false,
            };
        }
    }

    // Extension gate before any network traffic.
    if let Err(e) = safety::check_extension(&entry.url) {
        return record_failure(ctx, entry, None, "fileType", &e.to_string(), true).await;
    }

    // SSRF gate, unless explicitly opted out.
    if ctx.config.ssrf_check() {
        match safety::check_ssrf(&entry.url).await {
            Ok(()) => {}
            Err(e @ safety::SafetyError::Ssrf { .. }) => {
                return record_failure(ctx, entry, None, "ssrf", &e.to_string(), true).await;
            }
            Err(e) => {
                // DNS failure: transient, same treatment as a network error.
                let error = FetchError::Network(e.to_string());
                if entry.attempt < ctx.config.retry_count() {
                    return UrlOutcome::Retry { error };
                }
                return record_failure(ctx, entry, None, error.kind(), &error.to_string(), false)
                    .await;
            }
        }
    }

    // Robots: denial is terminal; the crawl-delay hint flows back either way.
    let verdict = ctx.robots.check(&entry.url).await;
    *crawl_delay = verdict.crawl_delay;
    if !verdict.allowed {
        let err = FetchError::BlockedByRobots;
        return record_failure(ctx, entry, None, err.kind(), &err.to_string(), false).await;
    }

    if ctx.cancel.is_cancelled() {
        return UrlOutcome::Cancelled;
    }

    info!(target: "webmirror::scheduler", "fetching [depth {}] {}", entry.depth, entry.url);
    let fetched = match ctx.fetcher.fetch(&entry.url).await {
        Ok(result) => result,
        Err(error) => {
            if error.retryable() && entry.attempt < ctx.config.retry_count() {
                debug!(
                    target: "webmirror::scheduler",
                    "retryable failure for {} (attempt {}): {error}", entry.url, entry.attempt
                );
                return UrlOutcome::Retry { error };
            }
            return record_failure(ctx, entry, None, error.kind(), &error.to_string(), false)
                .await;
        }
    };

    if ctx.cancel.is_cancelled() {
        // In-flight result discarded; the URL stays unrecorded for resume.
        return UrlOutcome::Cancelled;
    }

    // MIME gate on the declared content type.
    if let Some(content_type) = fetched.content_type.as_deref()
        && let Err(e) = safety::check_content_type(content_type)
    {
        return record_failure(
            ctx,
            entry,
            Some(fetched.status_code),
            "unsupportedType",
            &e.to_string(),
            true,
        )
        .await;
    }

    let is_text = fetched
        .content_type
        .as_deref()
        .map(|ct| ct.starts_with("text/") || ct.contains("xhtml"))
        .unwrap_or(true);

    let page = if is_text {
        extract::extract(
            &fetched.final_url,
            &fetched.body,
            fetched.encoding.as_deref(),
            ctx.config.ignore_get_params(),
        )
    } else {
        // Non-text payloads carry no links or canonical; hash raw bytes.
        extract::PageData {
            title: None,
            description: None,
            og: Vec::new(),
            canonical: None,
            links: Vec::new(),
            normalized_text: String::new(),
            checksum: hex::encode(sha2::Sha256::digest(&fetched.body)),
        }
    };

    // D2 / D3.
    let decision = match ctx.dedup.check_after_fetch(&fetched.final_url, &page).await {
        Ok(decision) => decision,
        Err(e) => {
            return UrlOutcome::Failed {
                error: format!("store: {e}"),
                safety_blocked: false,
            };
        }
    };

    match decision {
        PostFetchDecision::EnqueueCanonical { canonical, newly_seen } => {
            let row = base_row(ctx, entry, Some(fetched.status_code));
            let row = ScrapedUrlRow {
                canonical_url: Some(canonical.to_string()),
                ..row
            };
            if let Err(e) = record_row(ctx, &row).await {
                return e;
            }
            UrlOutcome::Canonical { canonical, newly_seen }
        }
        PostFetchDecision::DuplicateOf { checksum, first_url } => {
            debug!(
                target: "webmirror::scheduler",
                "duplicate content: {} == {first_url}", entry.url
            );
            let row = ScrapedUrlRow {
                content_checksum: Some(checksum),
                ..base_row(ctx, entry, Some(fetched.status_code))
            };
            if let Err(e) = record_row(ctx, &row).await {
                return e;
            }
            UrlOutcome::Done { links: page.links, written: None }
        }
        PostFetchDecision::Materialize => {
            let relative = match safety::safe_filename(&fetched.final_url) {
                Ok(path) => path,
                Err(e) => {
                    return record_failure(
                        ctx,
                        entry,
                        Some(fetched.status_code),
                        "path",
                        &e.to_string(),
                        true,
                    )
                    .await;
                }
            };

            let metadata = PageMetadata::build(
                fetched.final_url.as_str(),
                fetched.status_code,
                fetched.encoding.as_deref(),
                &fetched.headers,
                &page,
            );

            if ctx.cancel.is_cancelled() {
                return UrlOutcome::Cancelled;
            }
            let written = match ctx.writer.write_page(&relative, &fetched.body, &metadata).await {
                Ok(path) => path,
                Err(e) => {
                    warn!(target: "webmirror::writer", "write failed for {}: {e}", entry.url);
                    return record_failure(
                        ctx,
                        entry,
                        Some(fetched.status_code),
                        "write",
                        &e.to_string(),
                        false,
                    )
                    .await;
                }
            };

            let row = ScrapedUrlRow {
                target_filename: Some(written.to_string_lossy().to_string()),
                content_checksum: Some(page.checksum.clone()),
                canonical_url: page.canonical.as_ref().map(|c| c.to_string()),
                ..base_row(ctx, entry, Some(fetched.status_code))
            };
            if let Err(e) = record_row(ctx, &row).await {
                return e;
            }
            UrlOutcome::Done { links: page.links, written: Some(written) }
        }
    }
}

fn base_row(ctx: &WorkerContext, entry: &FrontierEntry, status: Option<u16>) -> ScrapedUrlRow {
    ScrapedUrlRow {
        url: entry.key.clone(),
        session_id: ctx.session_id,
        status_code: status.map(i64::from),
        target_filename: None,
        scraped_at: Utc::now(),
        error: None,
        canonical_url: None,
        content_checksum: None,
        depth: i64::from(entry.depth),
    }
}

async fn record_row(ctx: &WorkerContext, row: &ScrapedUrlRow) -> Result<(), UrlOutcome> {
    if ctx.cancel.is_cancelled() {
        return Err(UrlOutcome::Cancelled);
    }
    ctx.store.record_scrape(row).await.map_err(|e| UrlOutcome::Failed {
        error: format!("store: {e}"),
        safety_blocked: false,
    })
}

async fn record_failure(
    ctx: &WorkerContext,
    entry: &FrontierEntry,
    status: Option<u16>,
    kind: &str,
    detail: &str,
    safety_blocked: bool,
) -> UrlOutcome {
    // The seed's safety failures abort the session before any row lands.
    if safety_blocked && is_seed(&ctx.config, entry) {
        return UrlOutcome::Failed {
            error: format!("{kind}: {detail}"),
            safety_blocked: true,
        };
    }
    let row = ScrapedUrlRow {
        error: Some(format!("{kind}: {detail}")),
        ..base_row(ctx, entry, status)
    };
    if let Err(outcome) = record_row(ctx, &row).await {
        return outcome;
    }
    UrlOutcome::Failed {
        error: format!("{kind}: {detail}"),
        safety_blocked,
    }
}
