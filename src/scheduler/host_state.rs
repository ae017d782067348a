//! Per-host politeness state, owned exclusively by the coordinator.
//!
//! The delay rule: the first 3 requests to a new host dispatch freely;
//! from the 4th onward a jittered delay in `[request_delay, 2 *
//! request_delay]` must have elapsed since the last dispatch to that host,
//! raised to the robots crawl-delay when that is longer.

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use url::Url;

/// Requests to a host that dispatch without any delay.
const FREE_REQUESTS: u64 = 3;

#[derive(Debug, Default)]
pub struct HostState {
    pub request_count: u64,
    pub last_request_at: Option<Instant>,
    pub next_allowed_at: Option<Instant>,
    pub crawl_delay_hint: Option<Duration>,
    pub inflight: usize,
}

/// Map of host politeness states plus the configured base delay.
pub struct HostMap {
    hosts: HashMap<String, HostState>,
    request_delay: Duration,
}

impl HostMap {
    pub fn new(request_delay: Duration) -> Self {
        Self {
            hosts: HashMap::new(),
            request_delay,
        }
    }

    /// Scheduling key for a URL: host plus explicit port.
    pub fn authority(url: &Url) -> String {
        let host = url.host_str().unwrap_or_default();
        match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    /// Whether a request to this host may dispatch right now.
    pub fn is_ready(&self, authority: &str, now: Instant) -> bool {
        match self.hosts.get(authority).and_then(|h| h.next_allowed_at) {
            Some(next) => next <= now,
            None => true,
        }
    }

    /// When this host next becomes dispatchable, `None` when it already is.
    pub fn next_ready(&self, authority: &str) -> Option<Instant> {
        self.hosts.get(authority).and_then(|h| h.next_allowed_at)
    }

    /// Record a dispatch and arm the delay gate for the next request.
    pub fn note_dispatch(&mut self, authority: &str, now: Instant) {
        let request_delay = self.request_delay;
        let host = self.hosts.entry(authority.to_string()).or_default();
        host.request_count += 1;
        host.last_request_at = Some(now);
        host.inflight += 1;

        host.next_allowed_at = if host.request_count >= FREE_REQUESTS {
            let jittered = jittered_delay(request_delay);
            let delay = match host.crawl_delay_hint {
                Some(hint) => jittered.max(hint),
                None => jittered,
            };
            (delay > Duration::ZERO).then(|| now + delay)
        } else {
            None
        };
    }

    pub fn note_complete(&mut self, authority: &str) {
        if let Some(host) = self.hosts.get_mut(authority) {
            host.inflight = host.inflight.saturating_sub(1);
        }
    }

    /// Robots crawl-delay becomes a lower bound on this host's delay.
    pub fn set_crawl_delay(&mut self, authority: &str, delay: Duration) {
        let host = self.hosts.entry(authority.to_string()).or_default();
        if host.crawl_delay_hint.is_none_or(|current| delay > current) {
            host.crawl_delay_hint = Some(delay);
        }
    }

    #[cfg(test)]
    pub fn state(&self, authority: &str) -> Option<&HostState> {
        self.hosts.get(authority)
    }
}

fn jittered_delay(base: Duration) -> Duration {
    if base.is_zero() {
        return Duration::ZERO;
    }
    let secs = rand::rng().random_range(base.as_secs_f64()..=base.as_secs_f64() * 2.0);
    Duration::from_secs_f64(secs)
}
