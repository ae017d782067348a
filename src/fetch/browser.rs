//! Headless-browser fetch adapter built on chromiumoxide.
//!
//! For sites that only render their content with JavaScript. The browser
//! is launched lazily on the first fetch and shared by all workers; every
//! page operation runs under an explicit timeout so a wedged renderer can
//! never hang the crawl.

use std::future::Future;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use futures::future::BoxFuture;
use log::{debug, warn};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use url::Url;

use super::{FetchError, FetchOptions, FetchResult, Fetcher};

pub struct BrowserFetcher {
    opts: FetchOptions,
    browser: OnceCell<(Browser, JoinHandle<()>)>,
}

impl BrowserFetcher {
    pub fn new(opts: FetchOptions) -> Self {
        Self {
            opts,
            browser: OnceCell::new(),
        }
    }

    async fn browser(&self) -> Result<&Browser, FetchError> {
        let (browser, _) = self
            .browser
            .get_or_try_init(|| async {
                let config = BrowserConfig::builder()
                    .build()
                    .map_err(FetchError::Network)?;
                let (browser, mut handler) = Browser::launch(config)
                    .await
                    .map_err(|e| FetchError::Network(format!("browser launch: {e}")))?;
                // Drive the CDP connection until the browser goes away.
                let handler_task = tokio::spawn(async move {
                    while let Some(event) = handler.next().await {
                        if event.is_err() {
                            break;
                        }
                    }
                });
                debug!(target: "webmirror::fetch", "headless browser launched");
                Ok::<_, FetchError>((browser, handler_task))
            })
            .await?;
        Ok(browser)
    }

    async fn fetch_inner(&self, url: &Url) -> Result<FetchResult, FetchError> {
        let browser = self.browser().await?;
        let timeout = self.opts.timeout;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| FetchError::Network(format!("new page: {e}")))?;

        let navigated = with_timeout(page.goto(url.as_str()), timeout, "navigation").await;
        if let Err(e) = navigated {
            let _ = page.close().await;
            return Err(e);
        }
        if let Err(e) = with_timeout(page.wait_for_navigation(), timeout, "page load").await {
            let _ = page.close().await;
            return Err(e);
        }

        let content = with_timeout(page.content(), timeout, "content read").await;
        let final_url = match page.url().await {
            Ok(Some(u)) => Url::parse(&u).unwrap_or_else(|_| url.clone()),
            _ => url.clone(),
        };
        if let Err(e) = page.close().await {
            warn!(target: "webmirror::fetch", "page close failed for {url}: {e}");
        }

        let html = content?;
        let body = html.into_bytes();
        if body.len() > self.opts.max_body_bytes {
            return Err(FetchError::Oversize(self.opts.max_body_bytes));
        }

        // CDP does not surface the main-document status; a rendered page is
        // treated as a success and script-level failures show up as content.
        Ok(FetchResult {
            status_code: 200,
            headers: vec![("content-type".to_string(), "text/html".to_string())],
            body,
            final_url,
            content_type: Some("text/html".to_string()),
            encoding: Some("utf-8".to_string()),
        })
    }

    /// Tear the browser down; in-flight pages are abandoned.
    pub async fn shutdown(&self) {
        if let Some((_, handler_task)) = self.browser.get() {
            handler_task.abort();
        }
    }
}

impl Fetcher for BrowserFetcher {
    fn fetch<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<FetchResult, FetchError>> {
        Box::pin(self.fetch_inner(url))
    }

    fn name(&self) -> &'static str {
        "browser"
    }
}

async fn with_timeout<T, E: std::fmt::Display>(
    operation: impl Future<Output = Result<T, E>>,
    timeout: Duration,
    what: &str,
) -> Result<T, FetchError> {
    match tokio::time::timeout(timeout, operation).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(FetchError::Network(format!("{what}: {e}"))),
        Err(_) => Err(FetchError::Timeout),
    }
}
