//! Three-layer deduplication.
//!
//! Ordered cheapest-first and short-circuiting:
//!
//! 1. **D1 URL identity** (pre-fetch) — a URL with a successful row in the
//!    store is not fetched again unless `--force-rescrape`.
//! 2. **D2 canonical** (post-fetch) — a page whose declared canonical
//!    differs from its final URL is not materialized; the canonical is
//!    enqueued instead.
//! 3. **D3 content** (post-fetch) — a page whose normalized-text checksum
//!    is already claimed records a row pointing at the first URL and skips
//!    the write.
//!
//! Each stage has its own disable flag.

use anyhow::Result;
use dashmap::DashSet;
use log::debug;
use url::Url;

use crate::extract::PageData;
use crate::store::Store;

/// Per-stage disable switches, straight from the CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct DedupOptions {
    /// Disables D1 (and, with `--clear-urls`, wipes checksums).
    pub force_rescrape: bool,
    /// Disables D2.
    pub ignore_canonical: bool,
    /// Disables D3.
    pub ignore_duplicates: bool,
}

/// D1 outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreFetchDecision {
    Proceed,
    AlreadyScraped,
}

/// Combined D2/D3 outcome.
#[derive(Debug, Clone)]
pub enum PostFetchDecision {
    /// Fresh content: the checksum is now claimed by this URL, write it.
    Materialize,
    /// Canonical mismatch: record the row without a file, enqueue this URL
    /// if it was not already known as a canonical. Whether the canonical is
    /// actually crawled is up to the scheduler's admission rules.
    EnqueueCanonical { canonical: Url, newly_seen: bool },
    /// Content already stored under `first_url`.
    DuplicateOf { checksum: String, first_url: String },
}

pub struct DedupEngine {
    store: Store,
    options: DedupOptions,
    /// Canonical URLs observed in this or earlier sessions, so the same
    /// canonical is not enqueued once per query-string variant.
    canonicals: DashSet<String>,
}

impl DedupEngine {
    /// Build the engine, priming the canonical set from the store.
    pub async fn new(store: Store, options: DedupOptions) -> Result<Self> {
        let canonicals = DashSet::new();
        for canonical in store.all_canonicals().await? {
            canonicals.insert(canonical);
        }
        Ok(Self { store, options, canonicals })
    }

    /// D1: should this URL be fetched at all?
    pub async fn check_before_fetch(&self, url_key: &str) -> Result<PreFetchDecision> {
        if self.options.force_rescrape {
            return Ok(PreFetchDecision::Proceed);
        }
        if self.store.is_scraped_ok(url_key).await? {
            debug!(target: "webmirror::dedup", "D1 skip: {url_key}");
            return Ok(PreFetchDecision::AlreadyScraped);
        }
        Ok(PreFetchDecision::Proceed)
    }

    /// D2 then D3. D3 *claims* the checksum atomically, so of two workers
    /// racing on identical content exactly one materializes.
    pub async fn check_after_fetch(
        &self,
        final_url: &Url,
        page: &PageData,
    ) -> Result<PostFetchDecision> {
        if !self.options.ignore_canonical
            && let Some(canonical) = &page.canonical
            && canonical.as_str() != final_url.as_str()
        {
            let newly_seen = self.canonicals.insert(canonical.to_string());
            debug!(
                target: "webmirror::dedup",
                "D2 canonical: {final_url} -> {canonical} (newly_seen={newly_seen})"
            );
            return Ok(PostFetchDecision::EnqueueCanonical {
                canonical: canonical.clone(),
                newly_seen,
            });
        }

        if !self.options.ignore_duplicates {
            let inserted = self
                .store
                .insert_checksum(&page.checksum, final_url.as_str())
                .await?;
            if !inserted {
                let first_url = self
                    .store
                    .checksum_owner(&page.checksum)
                    .await?
                    .unwrap_or_default();
                if first_url != final_url.as_str() {
                    debug!(
                        target: "webmirror::dedup",
                        "D3 duplicate: {final_url} matches {first_url}"
                    );
                    return Ok(PostFetchDecision::DuplicateOf {
                        checksum: page.checksum.clone(),
                        first_url,
                    });
                }
            }
        }

        Ok(PostFetchDecision::Materialize)
    }
}
