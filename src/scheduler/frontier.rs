//! FIFO frontier with duplicate suppression.
//!
//! Ordering is breadth-first by insertion; the membership set spans
//! queued, in-flight and completed URLs, so a URL is admitted at most once
//! per run. Retries re-enter through [`Frontier::requeue`], which bypasses
//! the membership check, carrying a not-before instant for backoff.

use std::collections::{HashSet, VecDeque};

use tokio::time::Instant;
use url::Url;

use super::host_state::HostMap;

/// One URL waiting to be dispatched.
#[derive(Debug, Clone)]
pub struct FrontierEntry {
    pub url: Url,
    /// Normalized string form, the store key.
    pub key: String,
    pub depth: u32,
    pub discovered_from: Option<String>,
    /// Zero on first dispatch, incremented per retry.
    pub attempt: u32,
    /// Backoff gate for retried entries.
    pub not_before: Option<Instant>,
}

impl FrontierEntry {
    pub fn new(url: Url, depth: u32, discovered_from: Option<String>) -> Self {
        let key = url.to_string();
        Self {
            url,
            key,
            depth,
            discovered_from,
            attempt: 0,
            not_before: None,
        }
    }
}

#[derive(Default)]
pub struct Frontier {
    queue: VecDeque<FrontierEntry>,
    seen: HashSet<String>,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a URL once; returns false when it was already seen.
    pub fn push(&mut self, entry: FrontierEntry) -> bool {
        if !self.seen.insert(entry.key.clone()) {
            return false;
        }
        self.queue.push_back(entry);
        true
    }

    /// Put a retried entry back without touching the membership set.
    pub fn requeue(&mut self, entry: FrontierEntry) {
        self.queue.push_back(entry);
    }

    /// Mark a URL as seen without queueing it (resume bookkeeping).
    pub fn mark_seen(&mut self, key: &str) {
        self.seen.insert(key.to_string());
    }

    /// Pop the first entry that is past its backoff gate and whose host is
    /// dispatchable. Scanning front-to-back keeps FIFO best effort.
    pub fn pop_ready(&mut self, now: Instant, hosts: &HostMap) -> Option<FrontierEntry> {
        let idx = self.queue.iter().position(|entry| {
            entry.not_before.is_none_or(|nb| nb <= now)
                && hosts.is_ready(&HostMap::authority(&entry.url), now)
        })?;
        self.queue.remove(idx)
    }

    /// Earliest instant at which some queued entry could dispatch, `None`
    /// when the queue is empty or something is dispatchable right now.
    pub fn next_wakeup(&self, now: Instant, hosts: &HostMap) -> Option<Instant> {
        self.queue
            .iter()
            .map(|entry| {
                let backoff = entry.not_before.unwrap_or(now);
                let host = hosts
                    .next_ready(&HostMap::authority(&entry.url))
                    .unwrap_or(now);
                backoff.max(host)
            })
            .min()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry(raw: &str, depth: u32) -> FrontierEntry {
        FrontierEntry::new(Url::parse(raw).unwrap(), depth, None)
    }

    #[test]
    fn fifo_order_with_duplicate_suppression() {
        let hosts = HostMap::new(Duration::ZERO);
        let mut frontier = Frontier::new();
        assert!(frontier.push(entry("https://example.com/a", 1)));
        assert!(frontier.push(entry("https://example.com/b", 1)));
        assert!(!frontier.push(entry("https://example.com/a", 2)));
        assert_eq!(frontier.len(), 2);

        let now = Instant::now();
        let first = frontier.pop_ready(now, &hosts).unwrap();
        assert_eq!(first.key, "https://example.com/a");
        let second = frontier.pop_ready(now, &hosts).unwrap();
        assert_eq!(second.key, "https://example.com/b");
        assert!(frontier.pop_ready(now, &hosts).is_none());
    }

    #[test]
    fn backoff_gates_are_honored() {
        let hosts = HostMap::new(Duration::ZERO);
        let mut frontier = Frontier::new();
        let now = Instant::now();

        let mut delayed = entry("https://example.com/retry", 0);
        delayed.attempt = 1;
        delayed.not_before = Some(now + Duration::from_secs(10));
        frontier.push(entry("https://example.com/ok", 0));
        frontier.requeue(delayed);

        assert_eq!(frontier.pop_ready(now, &hosts).unwrap().key, "https://example.com/ok");
        // Retry entry is not yet ready.
        assert!(frontier.pop_ready(now, &hosts).is_none());
        assert_eq!(frontier.next_wakeup(now, &hosts), Some(now + Duration::from_secs(10)));
        // After the gate it dispatches.
        assert!(frontier.pop_ready(now + Duration::from_secs(11), &hosts).is_some());
    }

    #[test]
    fn busy_host_is_skipped_in_favor_of_ready_one() {
        let mut hosts = HostMap::new(Duration::from_secs(1));
        let now = Instant::now();
        for _ in 0..3 {
            hosts.note_dispatch("a.example", now);
        }

        let mut frontier = Frontier::new();
        frontier.push(entry("https://a.example/next", 0));
        frontier.push(entry("https://b.example/x", 0));

        // a.example is delayed, so b.example dispatches first.
        let popped = frontier.pop_ready(now, &hosts).unwrap();
        assert_eq!(popped.url.host_str(), Some("b.example"));
    }
}
