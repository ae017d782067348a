//! Session lifecycle: binds one crawl run to a session row, wires the
//! components together, and turns the final store counts into a summary.
//! Also home of the maintenance operations behind the `--show-*` and
//! `--clear-*` flags.

use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{info, warn};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::CrawlConfig;
use crate::dedup::DedupEngine;
use crate::fetch;
use crate::robots::RobotsCache;
use crate::safety;
use crate::scheduler::Scheduler;
use crate::store::{ScrapedUrlRow, SessionRow, SessionStatus, Store, StoreStats};
use crate::writer::Writer;

/// Top-level failure taxonomy; maps onto process exit codes.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("blocked for safety: {0}")]
    SafetyBlocked(String),
    #[error("store failure: {0}")]
    Store(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CrawlError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::SafetyBlocked(_) => 1,
            Self::Store(_) => 3,
            Self::Internal(_) => 4,
        }
    }
}

/// End-of-run report, derived from the store rather than in-memory
/// counters so it survives crashes faithfully.
#[derive(Debug, Clone)]
pub struct CrawlSummary {
    pub session_id: i64,
    pub status: SessionStatus,
    pub pages_success: i64,
    pub pages_failed: i64,
    pub started_at: DateTime<Utc>,
    pub elapsed: std::time::Duration,
    pub written_files: Vec<std::path::PathBuf>,
}

impl CrawlSummary {
    pub fn pages_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.pages_success as f64 / secs
        } else {
            0.0
        }
    }
}

/// Owns session lifecycle transitions for one output directory.
pub struct SessionController {
    config: CrawlConfig,
    store: Store,
}

impl SessionController {
    pub async fn new(config: CrawlConfig) -> Result<Self, CrawlError> {
        let store = Store::open(config.output_dir())
            .await
            .map_err(|e| CrawlError::Store(format!("{e:#}")))?;
        Ok(Self { config, store })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Run one crawl under the given cancellation token.
    pub async fn run(&self, cancel: CancellationToken) -> Result<CrawlSummary, CrawlError> {
        // The seed must clear the safety gates before a session is worth
        // starting; a blocked start URL fails the whole run.
        if let Err(e) = safety::check_extension(self.config.start_url()) {
            return self.fail_before_start(e.to_string()).await;
        }
        if self.config.ssrf_check() {
            match safety::check_ssrf(self.config.start_url()).await {
                Ok(()) => {}
                Err(e @ safety::SafetyError::Ssrf { .. }) => {
                    return self.fail_before_start(e.to_string()).await;
                }
                Err(e) => {
                    // Unresolvable start host is a configuration problem.
                    return Err(CrawlError::Config(e.to_string()));
                }
            }
        }

        let session = self
            .store
            .open_session(self.config.start_url().as_str(), &self.config.snapshot_json())
            .await
            .map_err(|e| CrawlError::Config(format!("{e:#}")))?;
        info!(
            target: "webmirror::session",
            "session {} started for {}", session.id, self.config.start_url()
        );
        let started = Instant::now();

        let totals = match self.build_and_run(&session, cancel.clone()).await {
            Ok(totals) => totals,
            Err(e) => {
                warn!(target: "webmirror::session", "session {} failed: {e:#}", session.id);
                let _ = self.store.finish_session(session.id, SessionStatus::Failed).await;
                return Err(CrawlError::Internal(e));
            }
        };

        let status = if totals.interrupted {
            SessionStatus::Interrupted
        } else {
            SessionStatus::Completed
        };
        self.store
            .finish_session(session.id, status)
            .await
            .map_err(|e| CrawlError::Store(format!("{e:#}")))?;

        // Counts come from the rows, not from in-memory tallies.
        let (ok, failed) = self
            .store
            .session_counts(session.id)
            .await
            .map_err(|e| CrawlError::Store(format!("{e:#}")))?;

        Ok(CrawlSummary {
            session_id: session.id,
            status,
            pages_success: ok,
            pages_failed: failed,
            started_at: session.started_at,
            elapsed: started.elapsed(),
            written_files: totals.written_files,
        })
    }

    async fn build_and_run(
        &self,
        session: &SessionRow,
        cancel: CancellationToken,
    ) -> Result<crate::scheduler::CrawlTotals> {
        let fetch_options = fetch::FetchOptions {
            user_agent: self.config.user_agent().to_string(),
            timeout: self.config.timeout(),
            max_body_bytes: self.config.max_body_bytes(),
        };
        let fetcher = fetch::make_fetcher(
            self.config.backend(),
            fetch_options,
            self.config.scraper_config(),
        )?;

        let robots_client = reqwest::Client::builder()
            .user_agent(self.config.user_agent().to_string())
            .timeout(self.config.timeout())
            .build()?;
        let robots = RobotsCache::new(robots_client, self.config.user_agent());

        let dedup = DedupEngine::new(self.store.clone(), self.config.dedup()).await?;
        let writer = Writer::new(self.config.output_dir()).await?;

        let scheduler = Scheduler::new(
            self.config.clone(),
            self.store.clone(),
            fetcher,
            robots,
            dedup,
            writer,
            cancel,
            session.id,
        );
        scheduler.run().await
    }

    /// Record a failed session for a start URL that never cleared safety.
    async fn fail_before_start(&self, reason: String) -> Result<CrawlSummary, CrawlError> {
        if let Ok(session) = self
            .store
            .open_session(self.config.start_url().as_str(), &self.config.snapshot_json())
            .await
        {
            let _ = self.store.finish_session(session.id, SessionStatus::Failed).await;
        }
        Err(CrawlError::SafetyBlocked(reason))
    }

    /// `--clear-urls`: forget scraped URLs; checksums survive unless a
    /// forced rescrape asked for them too.
    pub async fn clear_urls(&self, also_checksums: bool) -> Result<(u64, u64), CrawlError> {
        Maintenance::over(self.store.clone(), self.config.output_dir().to_path_buf())
            .clear_urls(also_checksums)
            .await
    }
}

/// Store maintenance behind the `--show-*` / `--clear-*` /
/// `--cleanup-sessions` flags. Needs only an output directory, not a
/// full crawl configuration.
pub struct Maintenance {
    store: Store,
    output_dir: std::path::PathBuf,
}

impl Maintenance {
    pub async fn open(output_dir: &std::path::Path) -> Result<Self, CrawlError> {
        let store = Store::open(output_dir)
            .await
            .map_err(|e| CrawlError::Store(format!("{e:#}")))?;
        Ok(Self::over(store, output_dir.to_path_buf()))
    }

    pub fn over(store: Store, output_dir: std::path::PathBuf) -> Self {
        Self { store, output_dir }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub async fn stats(&self) -> Result<StoreStats, CrawlError> {
        self.store.stats().await.map_err(store_err)
    }

    pub async fn sessions(&self) -> Result<Vec<SessionRow>, CrawlError> {
        self.store.list_sessions().await.map_err(store_err)
    }

    pub async fn errors(&self) -> Result<Vec<ScrapedUrlRow>, CrawlError> {
        self.store.list_errors().await.map_err(store_err)
    }

    pub async fn scraped_urls(&self) -> Result<Vec<ScrapedUrlRow>, CrawlError> {
        self.store.list_all_scraped().await.map_err(store_err)
    }

    /// Remove one session from the database; with `delete_files`, also
    /// remove the files it materialized.
    pub async fn clear_session(&self, id: i64, delete_files: bool) -> Result<usize, CrawlError> {
        let files = self.store.delete_session(id).await.map_err(store_err)?;
        let mut removed = 0;
        if delete_files {
            for relative in &files {
                let path = self.output_dir.join(relative);
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        warn!(
                            target: "webmirror::session",
                            "could not delete {}: {e}", path.display()
                        );
                    }
                }
                // Sidecar goes with the page file.
                if let (Some(parent), Some(name)) =
                    (path.parent(), path.file_name().and_then(|f| f.to_str()))
                {
                    let _ = tokio::fs::remove_file(parent.join(safety::sidecar_name(name))).await;
                }
            }
        }
        info!(
            target: "webmirror::session",
            "cleared session {id} ({} row file(s), {removed} deleted)", files.len()
        );
        Ok(files.len())
    }

    pub async fn clear_last_session(&self, delete_files: bool) -> Result<Option<i64>, CrawlError> {
        match self.store.last_session().await.map_err(store_err)? {
            Some(session) => {
                self.clear_session(session.id, delete_files).await?;
                Ok(Some(session.id))
            }
            None => Ok(None),
        }
    }

    /// Reclaim orphaned `running` sessions and drop empty terminal ones.
    pub async fn cleanup_sessions(&self) -> Result<(u64, u64), CrawlError> {
        let reclaimed = self
            .store
            .reclaim_orphans(crate::store::ORPHAN_IDLE)
            .await
            .map_err(store_err)?;
        let deleted = self.store.cleanup_sessions().await.map_err(store_err)?;
        Ok((reclaimed, deleted))
    }

    pub async fn clear_urls(&self, also_checksums: bool) -> Result<(u64, u64), CrawlError> {
        let urls = self.store.clear_urls().await.map_err(store_err)?;
        let checksums = if also_checksums {
            self.store.clear_checksums().await.map_err(store_err)?
        } else {
            0
        };
        Ok((urls, checksums))
    }
}

fn store_err(e: anyhow::Error) -> CrawlError {
    CrawlError::Store(format!("{e:#}"))
}
