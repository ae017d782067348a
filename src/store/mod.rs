//! Durable crawl tracking store backed by SQLite.
//!
//! One database per output directory (`scrape_tracker.db`) holding:
//! - `sessions` — one row per crawl run with lifecycle status and counters
//! - `scraped_urls` — one row per attempted URL (upserted on re-attempt)
//! - `content_checksums` — SHA-256 of normalized page text, first-seen URL
//! - `schema_version` — single-row version table, forward migrations only
//!
//! SQLite in WAL mode serializes the single writer while readers proceed
//! concurrently, which is exactly the concurrency contract the engine
//! needs: workers record results as they complete, maintenance queries can
//! run at any time.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use log::{debug, info};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};

/// Database filename inside the output directory.
pub const DB_FILENAME: &str = "scrape_tracker.db";

/// Running sessions with no URL activity for this long are reclaimed as
/// interrupted at startup.
pub const ORPHAN_IDLE: Duration = Duration::from_secs(60 * 60);

/// Forward-only migrations; index = schema version - 1.
const MIGRATIONS: &[&str] = &[r#"
CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    start_url TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'running',
    started_at TEXT NOT NULL,
    ended_at TEXT,
    config_json TEXT NOT NULL DEFAULT '{}',
    pages_success INTEGER NOT NULL DEFAULT 0,
    pages_failed INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS scraped_urls (
    url TEXT PRIMARY KEY,
    session_id INTEGER NOT NULL REFERENCES sessions(id),
    status_code INTEGER,
    target_filename TEXT,
    scraped_at TEXT NOT NULL,
    error TEXT,
    canonical_url TEXT,
    content_checksum TEXT REFERENCES content_checksums(checksum),
    depth INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_scraped_urls_session ON scraped_urls(session_id);
CREATE INDEX IF NOT EXISTS idx_scraped_urls_checksum ON scraped_urls(content_checksum);

CREATE TABLE IF NOT EXISTS content_checksums (
    checksum TEXT PRIMARY KEY,
    first_url TEXT NOT NULL,
    first_scraped_at TEXT NOT NULL
);
"#];

/// Terminal and non-terminal session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "completed" => Self::Completed,
            "interrupted" => Self::Interrupted,
            "failed" => Self::Failed,
            _ => Self::Running,
        }
    }
}

/// One crawl run.
#[derive(Debug, Clone)]
pub struct SessionRow {
    pub id: i64,
    pub start_url: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub config_json: String,
    pub pages_success: i64,
    pub pages_failed: i64,
}

/// One attempted URL, keyed by its normalized form.
#[derive(Debug, Clone)]
pub struct ScrapedUrlRow {
    pub url: String,
    pub session_id: i64,
    pub status_code: Option<i64>,
    pub target_filename: Option<String>,
    pub scraped_at: DateTime<Utc>,
    pub error: Option<String>,
    pub canonical_url: Option<String>,
    pub content_checksum: Option<String>,
    pub depth: i64,
}

/// Aggregate numbers for `--show-db-stats`.
#[derive(Debug, Clone, Copy)]
pub struct StoreStats {
    pub sessions: i64,
    pub scraped_urls: i64,
    pub successful_urls: i64,
    pub failed_urls: i64,
    pub checksums: i64,
}

/// Handle to the tracking database of one output directory.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    db_path: PathBuf,
}

impl Store {
    /// Open (creating if needed) the store for an output directory and run
    /// pending migrations.
    pub async fn open(output_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .with_context(|| format!("failed to create {}", output_dir.display()))?;

        let db_path = output_dir.join(DB_FILENAME);
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .context("failed to open tracking database")?;

        let store = Self { pool, db_path };
        store.migrate().await?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
            .execute(&self.pool)
            .await
            .context("failed to create schema_version table")?;

        let current: Option<(i64,)> = sqlx::query_as("SELECT version FROM schema_version")
            .fetch_optional(&self.pool)
            .await
            .context("failed to read schema version")?;
        let current = current.map(|(v,)| v).unwrap_or(0);

        for (idx, migration) in MIGRATIONS.iter().enumerate() {
            let target = idx as i64 + 1;
            if target <= current {
                continue;
            }
            debug!(target: "webmirror::store", "applying schema migration {target}");
            sqlx::query(migration)
                .execute(&self.pool)
                .await
                .with_context(|| format!("migration {target} failed"))?;
            if current == 0 && target == 1 {
                sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
                    .bind(target)
                    .execute(&self.pool)
                    .await?;
            } else {
                sqlx::query("UPDATE schema_version SET version = ?")
                    .bind(target)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    // ----- sessions -----------------------------------------------------

    /// Create a new `running` session row after reclaiming orphans.
    ///
    /// Fails when another session is still legitimately running against
    /// this output directory.
    pub async fn open_session(&self, start_url: &str, config_json: &str) -> Result<SessionRow> {
        let reclaimed = self.reclaim_orphans(ORPHAN_IDLE).await?;
        if reclaimed > 0 {
            info!(target: "webmirror::store", "reclaimed {reclaimed} orphaned session(s)");
        }

        let live: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sessions WHERE status = 'running'")
                .fetch_one(&self.pool)
                .await?;
        if live.0 > 0 {
            bail!("another crawl session is already running against this output directory");
        }

        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO sessions (start_url, status, started_at, config_json) VALUES (?, 'running', ?, ?)",
        )
        .bind(start_url)
        .bind(now.to_rfc3339())
        .bind(config_json)
        .execute(&self.pool)
        .await
        .context("failed to insert session")?
        .last_insert_rowid();

        Ok(SessionRow {
            id,
            start_url: start_url.to_string(),
            status: SessionStatus::Running,
            started_at: now,
            ended_at: None,
            config_json: config_json.to_string(),
            pages_success: 0,
            pages_failed: 0,
        })
    }

    /// Transition a session to a terminal status exactly once.
    pub async fn finish_session(&self, id: i64, status: SessionStatus) -> Result<()> {
        sqlx::query(
            "UPDATE sessions SET status = ?, ended_at = ? WHERE id = ? AND status = 'running'",
        )
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await
        .context("failed to finish session")?;
        Ok(())
    }

    /// Bump the monotonic per-session counters.
    pub async fn bump_counters(&self, id: i64, success: u64, failed: u64) -> Result<()> {
        sqlx::query(
            "UPDATE sessions SET pages_success = pages_success + ?, pages_failed = pages_failed + ? WHERE id = ?",
        )
        .bind(success as i64)
        .bind(failed as i64)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark stale `running` sessions as `interrupted`. A session counts as
    /// stale when its newest URL activity (or its start, if it never
    /// recorded any) is older than `idle`.
    pub async fn reclaim_orphans(&self, idle: Duration) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::from_std(idle).unwrap_or_default();
        let result = sqlx::query(
            r#"
            UPDATE sessions SET status = 'interrupted', ended_at = ?
            WHERE status = 'running'
              AND COALESCE(
                    (SELECT MAX(su.scraped_at) FROM scraped_urls su WHERE su.session_id = sessions.id),
                    started_at
                  ) < ?
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("failed to reclaim orphan sessions")?;
        Ok(result.rows_affected())
    }

    pub async fn get_session(&self, id: i64) -> Result<Option<SessionRow>> {
        let row = sqlx::query(
            "SELECT id, start_url, status, started_at, ended_at, config_json, pages_success, pages_failed FROM sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(session_from_row).transpose()?)
    }

    pub async fn last_session(&self) -> Result<Option<SessionRow>> {
        let row = sqlx::query(
            "SELECT id, start_url, status, started_at, ended_at, config_json, pages_success, pages_failed FROM sessions ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(session_from_row).transpose()?)
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionRow>> {
        let rows = sqlx::query(
            "SELECT id, start_url, status, started_at, ended_at, config_json, pages_success, pages_failed FROM sessions ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(session_from_row).collect()
    }

    /// Delete a session's rows; returns the target filenames its scrapes
    /// produced so the caller can optionally delete the files too.
    pub async fn delete_session(&self, id: i64) -> Result<Vec<String>> {
        let files: Vec<(String,)> = sqlx::query_as(
            "SELECT target_filename FROM scraped_urls WHERE session_id = ? AND target_filename IS NOT NULL",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM scraped_urls WHERE session_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await.context("failed to delete session")?;

        Ok(files.into_iter().map(|(f,)| f).collect())
    }

    /// Delete every terminal session older than the most recent one that
    /// has no scraped URLs attached (failed startups, empty runs).
    pub async fn cleanup_sessions(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM sessions
            WHERE status != 'running'
              AND NOT EXISTS (SELECT 1 FROM scraped_urls su WHERE su.session_id = sessions.id)
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ----- scraped urls -------------------------------------------------

    /// Insert or update the row for one attempted URL.
    pub async fn record_scrape(&self, row: &ScrapedUrlRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scraped_urls
                (url, session_id, status_code, target_filename, scraped_at, error, canonical_url, content_checksum, depth)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                session_id = excluded.session_id,
                status_code = excluded.status_code,
                target_filename = excluded.target_filename,
                scraped_at = excluded.scraped_at,
                error = excluded.error,
                canonical_url = excluded.canonical_url,
                content_checksum = excluded.content_checksum,
                depth = excluded.depth
            "#,
        )
        .bind(&row.url)
        .bind(row.session_id)
        .bind(row.status_code)
        .bind(&row.target_filename)
        .bind(row.scraped_at.to_rfc3339())
        .bind(&row.error)
        .bind(&row.canonical_url)
        .bind(&row.content_checksum)
        .bind(row.depth)
        .execute(&self.pool)
        .await
        .context("failed to record scraped URL")?;
        Ok(())
    }

    pub async fn get_scraped(&self, url: &str) -> Result<Option<ScrapedUrlRow>> {
        let row = sqlx::query(
            "SELECT url, session_id, status_code, target_filename, scraped_at, error, canonical_url, content_checksum, depth FROM scraped_urls WHERE url = ?",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(scraped_from_row).transpose()?)
    }

    pub async fn list_scraped(&self, session_id: i64) -> Result<Vec<ScrapedUrlRow>> {
        let rows = sqlx::query(
            "SELECT url, session_id, status_code, target_filename, scraped_at, error, canonical_url, content_checksum, depth FROM scraped_urls WHERE session_id = ? ORDER BY scraped_at",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(scraped_from_row).collect()
    }

    pub async fn list_all_scraped(&self) -> Result<Vec<ScrapedUrlRow>> {
        let rows = sqlx::query(
            "SELECT url, session_id, status_code, target_filename, scraped_at, error, canonical_url, content_checksum, depth FROM scraped_urls ORDER BY scraped_at",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(scraped_from_row).collect()
    }

    pub async fn list_errors(&self) -> Result<Vec<ScrapedUrlRow>> {
        let rows = sqlx::query(
            "SELECT url, session_id, status_code, target_filename, scraped_at, error, canonical_url, content_checksum, depth FROM scraped_urls WHERE error IS NOT NULL ORDER BY scraped_at",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(scraped_from_row).collect()
    }

    /// Whether this URL already has a successful (2xx) row.
    pub async fn is_scraped_ok(&self, url: &str) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM scraped_urls WHERE url = ? AND status_code BETWEEN 200 AND 299 LIMIT 1",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Oldest-first successful pages that were materialized to disk, used
    /// for bounded frontier reconstruction on resume.
    pub async fn successful_pages(&self, limit: i64) -> Result<Vec<ScrapedUrlRow>> {
        let rows = sqlx::query(
            r#"
            SELECT url, session_id, status_code, target_filename, scraped_at, error, canonical_url, content_checksum, depth
            FROM scraped_urls
            WHERE status_code BETWEEN 200 AND 299 AND target_filename IS NOT NULL
            ORDER BY scraped_at
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(scraped_from_row).collect()
    }

    /// All URLs ever recorded, for resume admission filtering.
    pub async fn scraped_url_keys(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT url FROM scraped_urls")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(u,)| u).collect())
    }

    /// Per-session success/failure counts derived from the rows themselves,
    /// which is what the final summary reports.
    pub async fn session_counts(&self, session_id: i64) -> Result<(i64, i64)> {
        let row: (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(CASE WHEN status_code BETWEEN 200 AND 299 AND error IS NULL THEN 1 END),
                COUNT(CASE WHEN error IS NOT NULL OR status_code IS NULL OR status_code >= 400 THEN 1 END)
            FROM scraped_urls WHERE session_id = ?
            "#,
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    // ----- checksums ----------------------------------------------------

    /// First URL recorded under this checksum, if any.
    pub async fn checksum_owner(&self, checksum: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT first_url FROM content_checksums WHERE checksum = ?")
                .bind(checksum)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(u,)| u))
    }

    /// Register a checksum for its first URL. Returns false when the
    /// checksum was already present.
    pub async fn insert_checksum(&self, checksum: &str, first_url: &str) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO content_checksums (checksum, first_url, first_scraped_at) VALUES (?, ?, ?)",
        )
        .bind(checksum)
        .bind(first_url)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All canonical URLs ever observed, loaded once at session start.
    pub async fn all_canonicals(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT canonical_url FROM scraped_urls WHERE canonical_url IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(u,)| u).collect())
    }

    // ----- maintenance --------------------------------------------------

    /// Drop every scraped URL row, preserving content checksums.
    pub async fn clear_urls(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM scraped_urls")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Drop the content checksum table. Only meaningful together with
    /// `clear_urls` under a forced rescrape.
    pub async fn clear_checksums(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM content_checksums")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let (sessions,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sessions")
            .fetch_one(&self.pool)
            .await?;
        let (scraped_urls,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM scraped_urls")
            .fetch_one(&self.pool)
            .await?;
        let (successful_urls,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM scraped_urls WHERE status_code BETWEEN 200 AND 299",
        )
        .fetch_one(&self.pool)
        .await?;
        let (failed_urls,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM scraped_urls WHERE error IS NOT NULL")
                .fetch_one(&self.pool)
                .await?;
        let (checksums,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM content_checksums")
            .fetch_one(&self.pool)
            .await?;
        Ok(StoreStats {
            sessions,
            scraped_urls,
            successful_urls,
            failed_urls,
            checksums,
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("bad timestamp in store: {raw}"))
}

fn session_from_row(row: sqlx::sqlite::SqliteRow) -> Result<SessionRow> {
    let ended: Option<String> = row.get("ended_at");
    Ok(SessionRow {
        id: row.get("id"),
        start_url: row.get("start_url"),
        status: SessionStatus::parse(row.get("status")),
        started_at: parse_ts(row.get("started_at"))?,
        ended_at: ended.as_deref().map(parse_ts).transpose()?,
        config_json: row.get("config_json"),
        pages_success: row.get("pages_success"),
        pages_failed: row.get("pages_failed"),
    })
}

fn scraped_from_row(row: sqlx::sqlite::SqliteRow) -> Result<ScrapedUrlRow> {
    Ok(ScrapedUrlRow {
        url: row.get("url"),
        session_id: row.get("session_id"),
        status_code: row.get("status_code"),
        target_filename: row.get("target_filename"),
        scraped_at: parse_ts(row.get("scraped_at"))?,
        error: row.get("error"),
        canonical_url: row.get("canonical_url"),
        content_checksum: row.get("content_checksum"),
        depth: row.get("depth"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn url_row(session_id: i64, url: &str, status: i64) -> ScrapedUrlRow {
        ScrapedUrlRow {
            url: url.to_string(),
            session_id,
            status_code: Some(status),
            target_filename: Some("example.com/index.html".to_string()),
            scraped_at: Utc::now(),
            error: None,
            canonical_url: None,
            content_checksum: None,
            depth: 0,
        }
    }

    #[tokio::test]
    async fn open_is_idempotent_and_versioned() -> Result<()> {
        let dir = TempDir::new()?;
        let store = Store::open(dir.path()).await?;
        store.close().await;
        // Reopening must not fail or re-run migrations destructively.
        let store = Store::open(dir.path()).await?;
        let stats = store.stats().await?;
        assert_eq!(stats.sessions, 0);
        store.close().await;
        Ok(())
    }

    #[tokio::test]
    async fn session_lifecycle_and_counts() -> Result<()> {
        let dir = TempDir::new()?;
        let store = Store::open(dir.path()).await?;

        let session = store.open_session("https://example.com/", "{}").await?;
        assert_eq!(session.status, SessionStatus::Running);

        // A second concurrent session against the same directory is refused.
        assert!(store.open_session("https://example.com/", "{}").await.is_err());

        store.record_scrape(&url_row(session.id, "https://example.com/", 200)).await?;
        store.bump_counters(session.id, 1, 0).await?;

        let mut failed = url_row(session.id, "https://example.com/missing", 404);
        failed.error = Some("HTTP 404".to_string());
        failed.target_filename = None;
        store.record_scrape(&failed).await?;
        store.bump_counters(session.id, 0, 1).await?;

        let (ok, bad) = store.session_counts(session.id).await?;
        assert_eq!((ok, bad), (1, 1));

        store.finish_session(session.id, SessionStatus::Completed).await?;
        let finished = store.get_session(session.id).await?.unwrap();
        assert_eq!(finished.status, SessionStatus::Completed);
        assert!(finished.ended_at.unwrap() >= finished.started_at);
        assert_eq!(finished.pages_success, 1);
        assert_eq!(finished.pages_failed, 1);

        // A second open after the first finished works fine.
        let next = store.open_session("https://example.com/", "{}").await?;
        assert!(next.id > session.id);
        store.finish_session(next.id, SessionStatus::Interrupted).await?;

        store.close().await;
        Ok(())
    }

    #[tokio::test]
    async fn record_scrape_upserts_instead_of_duplicating() -> Result<()> {
        let dir = TempDir::new()?;
        let store = Store::open(dir.path()).await?;
        let session = store.open_session("https://example.com/", "{}").await?;

        store.record_scrape(&url_row(session.id, "https://example.com/a", 500)).await?;
        store.record_scrape(&url_row(session.id, "https://example.com/a", 200)).await?;

        let row = store.get_scraped("https://example.com/a").await?.unwrap();
        assert_eq!(row.status_code, Some(200));
        assert_eq!(store.stats().await?.scraped_urls, 1);

        store.close().await;
        Ok(())
    }

    #[tokio::test]
    async fn clear_urls_preserves_checksums() -> Result<()> {
        let dir = TempDir::new()?;
        let store = Store::open(dir.path()).await?;
        let session = store.open_session("https://example.com/", "{}").await?;

        assert!(store.insert_checksum("abc123", "https://example.com/").await?);
        assert!(!store.insert_checksum("abc123", "https://example.com/other").await?);

        let mut row = url_row(session.id, "https://example.com/", 200);
        row.content_checksum = Some("abc123".to_string());
        store.record_scrape(&row).await?;

        store.clear_urls().await?;
        let stats = store.stats().await?;
        assert_eq!(stats.scraped_urls, 0);
        assert_eq!(stats.checksums, 1);
        assert_eq!(
            store.checksum_owner("abc123").await?.as_deref(),
            Some("https://example.com/")
        );

        store.clear_checksums().await?;
        assert_eq!(store.stats().await?.checksums, 0);

        store.close().await;
        Ok(())
    }

    #[tokio::test]
    async fn orphan_sessions_are_reclaimed() -> Result<()> {
        let dir = TempDir::new()?;
        let store = Store::open(dir.path()).await?;
        let session = store.open_session("https://example.com/", "{}").await?;

        // Fresh session is not an orphan.
        assert_eq!(store.reclaim_orphans(ORPHAN_IDLE).await?, 0);
        // With a zero idle cutoff it is.
        assert_eq!(store.reclaim_orphans(Duration::ZERO).await?, 1);

        let reclaimed = store.get_session(session.id).await?.unwrap();
        assert_eq!(reclaimed.status, SessionStatus::Interrupted);

        store.close().await;
        Ok(())
    }

    #[tokio::test]
    async fn delete_session_returns_filenames() -> Result<()> {
        let dir = TempDir::new()?;
        let store = Store::open(dir.path()).await?;
        let session = store.open_session("https://example.com/", "{}").await?;
        store.record_scrape(&url_row(session.id, "https://example.com/", 200)).await?;
        store.finish_session(session.id, SessionStatus::Completed).await?;

        let files = store.delete_session(session.id).await?;
        assert_eq!(files, vec!["example.com/index.html".to_string()]);
        assert!(store.get_session(session.id).await?.is_none());
        assert_eq!(store.stats().await?.scraped_urls, 0);

        store.close().await;
        Ok(())
    }
}
