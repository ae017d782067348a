//! Per-host robots.txt cache.
//!
//! robots.txt is fetched at most once per host per session and the parsed
//! result is memoized, including the failure case: an unreachable or
//! unparseable robots.txt memoizes an allow-all entry so the host is never
//! probed again. A `Crawl-delay` directive surfaces as a duration hint the
//! scheduler folds into its per-host delay as a lower bound.

use std::collections::HashMap;
use std::time::Duration;

use log::{debug, warn};
use texting_robots::Robot;
use tokio::sync::Mutex;
use url::Url;

/// Outcome of a robots.txt consultation for one URL.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RobotsVerdict {
    pub allowed: bool,
    pub crawl_delay: Option<Duration>,
}

impl RobotsVerdict {
    fn allow_all() -> Self {
        Self { allowed: true, crawl_delay: None }
    }
}

enum CachedPolicy {
    Parsed(Box<Robot>),
    AllowAll,
}

/// Fetch-once, cache-forever robots.txt evaluator.
pub struct RobotsCache {
    client: reqwest::Client,
    user_agent: String,
    cache: Mutex<HashMap<String, CachedPolicy>>,
}

impl RobotsCache {
    pub fn new(client: reqwest::Client, user_agent: impl Into<String>) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `url` may be fetched, plus the host's crawl-delay hint.
    ///
    /// The cache lock is held across the robots.txt fetch so each host is
    /// fetched exactly once even under concurrent workers.
    pub async fn check(&self, url: &Url) -> RobotsVerdict {
        let authority = match authority_key(url) {
            Some(a) => a,
            None => return RobotsVerdict::allow_all(),
        };

        let mut cache = self.cache.lock().await;
        if !cache.contains_key(&authority) {
            let policy = self.fetch_policy(url, &authority).await;
            cache.insert(authority.clone(), policy);
        }

        match cache.get(&authority) {
            Some(CachedPolicy::Parsed(robot)) => RobotsVerdict {
                allowed: robot.allowed(url.as_str()),
                crawl_delay: robot.delay.map(Duration::from_secs_f32),
            },
            _ => RobotsVerdict::allow_all(),
        }
    }

    async fn fetch_policy(&self, url: &Url, authority: &str) -> CachedPolicy {
        let robots_url = format!("{}://{}/robots.txt", url.scheme(), authority);
        debug!(target: "webmirror::robots", "fetching {robots_url}");

        let body = match self.client.get(&robots_url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                Ok(b) => b,
                Err(e) => {
                    warn!(target: "webmirror::robots", "read failed for {robots_url}: {e}");
                    return CachedPolicy::AllowAll;
                }
            },
            Ok(resp) => {
                debug!(
                    target: "webmirror::robots",
                    "{robots_url} returned {}, allowing all", resp.status()
                );
                return CachedPolicy::AllowAll;
            }
            Err(e) => {
                debug!(target: "webmirror::robots", "fetch failed for {robots_url}: {e}");
                return CachedPolicy::AllowAll;
            }
        };

        match Robot::new(&self.user_agent, &body) {
            Ok(robot) => CachedPolicy::Parsed(Box::new(robot)),
            Err(e) => {
                warn!(target: "webmirror::robots", "unparseable {robots_url}: {e}");
                CachedPolicy::AllowAll
            }
        }
    }
}

fn authority_key(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_for(server_url: &str) -> (RobotsCache, Url) {
        let client = reqwest::Client::new();
        let cache = RobotsCache::new(client, "webmirror");
        let url = Url::parse(&format!("{server_url}/docs/page.html")).unwrap();
        (cache, url)
    }

    #[tokio::test]
    async fn disallow_rule_is_honored() {
        let mut server = mockito::Server::new_async().await;
        let robots = server
            .mock("GET", "/robots.txt")
            .with_status(200)
            .with_body("User-agent: *\nDisallow: /docs/\nCrawl-delay: 2\n")
            .expect(1)
            .create_async()
            .await;

        let (cache, url) = cache_for(&server.url());
        let verdict = cache.check(&url).await;
        assert!(!verdict.allowed);
        assert_eq!(verdict.crawl_delay, Some(Duration::from_secs(2)));

        // Second lookup must hit the cache, not the server.
        let again = cache.check(&url).await;
        assert_eq!(again, verdict);
        robots.assert_async().await;
    }

    #[tokio::test]
    async fn missing_robots_defaults_to_allowed() {
        let mut server = mockito::Server::new_async().await;
        let robots = server
            .mock("GET", "/robots.txt")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let (cache, url) = cache_for(&server.url());
        assert!(cache.check(&url).await.allowed);
        // Failure result is memoized too.
        assert!(cache.check(&url).await.allowed);
        robots.assert_async().await;
    }
}
