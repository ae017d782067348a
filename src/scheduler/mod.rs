//! Crawl coordination: one coordinator task owning the frontier, the host
//! map and the in-flight set, with worker tasks fanned out through a
//! `FuturesUnordered` capped at `concurrent_requests`.
//!
//! The per-host delay is a dispatch constraint, not a sleep inside a
//! worker: the coordinator simply refuses to hand out a URL whose host is
//! still inside its delay window, and sleeps until the earliest gate opens
//! when nothing is dispatchable.

mod frontier;
mod host_state;
mod worker;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use log::{debug, error, info, warn};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::CrawlConfig;
use crate::dedup::DedupEngine;
use crate::extract;
use crate::fetch::Fetcher;
use crate::robots::RobotsCache;
use crate::store::Store;
use crate::writer::Writer;

pub use frontier::{Frontier, FrontierEntry};
pub use host_state::HostMap;

use worker::{UrlOutcome, WorkerContext, WorkerReport, is_seed, process_url};

/// Base unit for retry backoff; doubled per attempt, capped at the
/// configured request delay.
const RETRY_BACKOFF_BASE: Duration = Duration::from_millis(250);

/// What one scheduler run produced.
#[derive(Debug, Default)]
pub struct CrawlTotals {
    pub pages_success: u64,
    pub pages_failed: u64,
    pub pages_skipped: u64,
    pub interrupted: bool,
    /// Relative paths materialized during this run.
    pub written_files: Vec<PathBuf>,
}

pub struct Scheduler {
    config: CrawlConfig,
    ctx: Arc<WorkerContext>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: CrawlConfig,
        store: Store,
        fetcher: Box<dyn Fetcher>,
        robots: RobotsCache,
        dedup: DedupEngine,
        writer: Writer,
        cancel: CancellationToken,
        session_id: i64,
    ) -> Self {
        let ctx = Arc::new(WorkerContext {
            config: config.clone(),
            store,
            fetcher,
            robots,
            dedup,
            writer,
            cancel,
            session_id,
        });
        Self { config, ctx }
    }

    /// Run the crawl to completion, cancellation, or page budget.
    pub async fn run(&self) -> Result<CrawlTotals> {
        let mut frontier = Frontier::new();
        let mut hosts = HostMap::new(self.config.request_delay());
        let mut totals = CrawlTotals::default();

        // The seed bypasses path restriction.
        frontier.push(FrontierEntry::new(self.config.start_url().clone(), 0, None));
        self.seed_from_previous_run(&mut frontier).await?;

        let concurrency = self.config.concurrent_requests();
        let mut active = FuturesUnordered::new();
        let cancel = self.ctx.cancel.clone();

        loop {
            // Fill the worker pool with everything dispatchable right now.
            while active.len() < concurrency
                && !cancel.is_cancelled()
                && !self.budget_reserved(&totals, active.len())
            {
                let now = Instant::now();
                let entry = match frontier.pop_ready(now, &hosts) {
                    Some(entry) => entry,
                    None => break,
                };
                let authority = HostMap::authority(&entry.url);
                hosts.note_dispatch(&authority, now);

                let ctx = Arc::clone(&self.ctx);
                let handle = tokio::spawn(process_url(ctx, entry));
                active.push(async move { (authority, handle.await) });
            }

            if active.is_empty() {
                if cancel.is_cancelled() || frontier.is_empty() || self.budget_reached(&totals) {
                    break;
                }
                // Nothing dispatchable: sleep until the earliest gate opens.
                let wakeup = frontier
                    .next_wakeup(Instant::now(), &hosts)
                    .unwrap_or_else(|| Instant::now() + Duration::from_millis(50));
                tokio::select! {
                    () = cancel.cancelled() => {}
                    () = tokio::time::sleep_until(wakeup) => {}
                }
                continue;
            }

            let (authority, joined) = active.next().await.expect("active set is non-empty");
            hosts.note_complete(&authority);

            let report: WorkerReport = match joined {
                Ok(report) => report,
                Err(e) => {
                    error!(target: "webmirror::scheduler", "worker task panicked: {e}");
                    totals.pages_failed += 1;
                    continue;
                }
            };
            if let Some(delay) = report.crawl_delay {
                hosts.set_crawl_delay(&authority, delay);
            }

            self.handle_outcome(report, &mut frontier, &mut totals).await?;
        }

        totals.interrupted = cancel.is_cancelled();
        info!(
            target: "webmirror::scheduler",
            "crawl loop finished: {} ok, {} failed, {} skipped{}",
            totals.pages_success,
            totals.pages_failed,
            totals.pages_skipped,
            if totals.interrupted { " (interrupted)" } else { "" }
        );
        Ok(totals)
    }

    fn budget_reached(&self, totals: &CrawlTotals) -> bool {
        self.config
            .max_pages()
            .is_some_and(|budget| totals.pages_success >= budget)
    }

    /// Dispatch gate for the page budget. In-flight workers count as
    /// reserved budget, so a burst of spawns cannot overshoot `max_pages`;
    /// a reservation freed by a failed or skipped worker is handed out
    /// again on the next fill pass.
    fn budget_reserved(&self, totals: &CrawlTotals, in_flight: usize) -> bool {
        self.config
            .max_pages()
            .is_some_and(|budget| totals.pages_success + in_flight as u64 >= budget)
    }

    async fn handle_outcome(
        &self,
        report: WorkerReport,
        frontier: &mut Frontier,
        totals: &mut CrawlTotals,
    ) -> Result<()> {
        let entry = report.entry;
        match report.outcome {
            UrlOutcome::Done { links, written } => {
                totals.pages_success += 1;
                self.ctx.store.bump_counters(self.ctx.session_id, 1, 0).await?;
                if let Some(path) = written {
                    totals.written_files.push(path);
                }
                for link in links {
                    self.admit(frontier, link, entry.depth + 1, Some(&entry.key));
                }
            }
            UrlOutcome::Canonical { canonical, newly_seen } => {
                totals.pages_success += 1;
                self.ctx.store.bump_counters(self.ctx.session_id, 1, 0).await?;
                // The canonical replaces this page at the same depth.
                if newly_seen {
                    self.admit(frontier, canonical, entry.depth, Some(&entry.key));
                }
            }
            UrlOutcome::SkippedPreFetch => {
                totals.pages_skipped += 1;
                debug!(target: "webmirror::scheduler", "already scraped: {}", entry.key);
            }
            UrlOutcome::Retry { error } => {
                let mut retry = entry;
                retry.attempt += 1;
                retry.not_before = Some(Instant::now() + self.backoff(retry.attempt));
                warn!(
                    target: "webmirror::scheduler",
                    "retry {}/{} for {}: {error}",
                    retry.attempt,
                    self.config.retry_count(),
                    retry.url
                );
                frontier.requeue(retry);
            }
            UrlOutcome::Failed { error, safety_blocked } => {
                if safety_blocked && is_seed(&self.config, &entry) {
                    bail!("start URL blocked: {error}");
                }
                totals.pages_failed += 1;
                self.ctx.store.bump_counters(self.ctx.session_id, 0, 1).await?;
                warn!(target: "webmirror::scheduler", "failed {}: {error}", entry.url);
            }
            UrlOutcome::Cancelled => {
                debug!(target: "webmirror::scheduler", "discarded (cancelled): {}", entry.url);
            }
        }
        Ok(())
    }

    /// Admission filter for discovered URLs: depth gate, path restriction,
    /// frontier membership.
    fn admit(&self, frontier: &mut Frontier, url: Url, depth: u32, from: Option<&str>) {
        if depth > self.config.max_depth() {
            return;
        }
        if !self.config.is_path_allowed(&url) {
            return;
        }
        let entry = FrontierEntry::new(url, depth, from.map(str::to_string));
        frontier.push(entry);
    }

    /// Resume support: re-read a bounded number of previously scraped
    /// pages, re-extract their outbound links, and admit the ones not yet
    /// recorded. Oldest-first approximates the original breadth-first
    /// discovery order.
    async fn seed_from_previous_run(&self, frontier: &mut Frontier) -> Result<()> {
        let limit = self.config.resume_scan_limit();
        if limit <= 0 {
            return Ok(());
        }
        let pages = self.ctx.store.successful_pages(limit).await?;
        if pages.is_empty() {
            return Ok(());
        }

        // Everything already recorded is marked seen so workers never even
        // receive it; D1 remains the durable backstop.
        let mut known = 0usize;
        if !self.config.dedup().force_rescrape {
            for key in self.ctx.store.scraped_url_keys().await? {
                frontier.mark_seen(&key);
                known += 1;
            }
        }

        let mut admitted = 0usize;
        for row in &pages {
            let Some(relative) = &row.target_filename else { continue };
            let path = self.config.output_dir().join(relative);
            let body = match tokio::fs::read(&path).await {
                Ok(body) => body,
                Err(e) => {
                    debug!(
                        target: "webmirror::scheduler",
                        "resume: cannot read {}: {e}", path.display()
                    );
                    continue;
                }
            };
            let Ok(page_url) = Url::parse(&row.url) else { continue };
            let page = extract::extract(&page_url, &body, None, self.config.ignore_get_params());
            for link in page.links {
                let before = frontier.len();
                self.admit(frontier, link, row.depth as u32 + 1, Some(&row.url));
                admitted += frontier.len() - before;
            }
        }
        info!(
            target: "webmirror::scheduler",
            "resume: scanned {} page(s), {} known URL(s), {} re-admitted",
            pages.len(),
            known,
            admitted
        );
        Ok(())
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exp = RETRY_BACKOFF_BASE.saturating_mul(1u32 << attempt.min(8));
        exp.min(self.config.request_delay().max(RETRY_BACKOFF_BASE))
    }
}
