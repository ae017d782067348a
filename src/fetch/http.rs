//! Static-HTML fetch adapter built on reqwest.
//!
//! The fast path for ordinary sites: one GET, redirects followed, body
//! streamed with a hard size cap.

use futures::StreamExt;
use futures::future::BoxFuture;
use log::debug;
use url::Url;

use super::{FetchError, FetchOptions, FetchResult, Fetcher, charset_of};

pub struct HttpFetcher {
    client: reqwest::Client,
    opts: FetchOptions,
}

impl HttpFetcher {
    pub fn new(opts: FetchOptions) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(opts.user_agent.clone())
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(opts.timeout)
            .build()?;
        Ok(Self { client, opts })
    }

    /// Share the underlying client, e.g. with the robots cache.
    pub fn client(&self) -> reqwest::Client {
        self.client.clone()
    }

    async fn fetch_inner(&self, url: &Url) -> Result<FetchResult, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if status.is_client_error() {
            return Err(FetchError::Http4xx(status.as_u16()));
        }
        if status.is_server_error() {
            return Err(FetchError::Http5xx(status.as_u16()));
        }

        let final_url = response.url().clone();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let content_type = headers
            .iter()
            .find(|(name, _)| name == "content-type")
            .map(|(_, value)| value.clone());
        let encoding = content_type.as_deref().and_then(charset_of);

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(classify_reqwest_error)?;
            if body.len() + chunk.len() > self.opts.max_body_bytes {
                body.extend_from_slice(&chunk[..self.opts.max_body_bytes - body.len()]);
                debug!(
                    target: "webmirror::fetch",
                    "truncated oversize body for {final_url}"
                );
                return Err(FetchError::Oversize(self.opts.max_body_bytes));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(FetchResult {
            status_code: status.as_u16(),
            headers,
            body,
            final_url,
            content_type,
            encoding,
        })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<FetchResult, FetchError>> {
        Box::pin(self.fetch_inner(url))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Map a reqwest error onto the fetch taxonomy. TLS failures only surface
/// through the error text, so this sniffs the message the same way the
/// retry classifier does.
fn classify_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::Timeout;
    }
    let msg = err.to_string();
    let lower = msg.to_lowercase();
    if lower.contains("certificate") || lower.contains("tls") || lower.contains("ssl") {
        FetchError::Tls(msg)
    } else {
        FetchError::Network(msg)
    }
}
