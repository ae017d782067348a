//! Site-mirror fetch adapter.
//!
//! Wraps an external mirroring tool (wget by default): the first fetch
//! drives the tool into a temporary directory, the adapter indexes the
//! files it produced, and every fetch — including that first one — is
//! answered from the index as a synthetic [`FetchResult`]. The rest of the
//! pipeline (extract, dedup, write, record) is identical to the live
//! backends, so the scheduler needs no special casing.
//!
//! The scheduler's per-host policy stays authoritative; bandwidth or
//! connection options in the scraper config are forwarded to the external
//! tool only.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use log::{debug, info, warn};
use serde::Deserialize;
use tokio::sync::Mutex;
use url::Url;

use crate::urlnorm;

use super::{FetchError, FetchOptions, FetchResult, Fetcher};

/// Options parsed from `--scraper-config` for the mirror backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MirrorOptions {
    /// External command to run.
    pub command: String,
    /// Arguments; `{dir}` and `{url}` are substituted. When neither
    /// placeholder appears, the directory and URL are appended.
    pub args: Vec<String>,
    /// Bandwidth cap forwarded to the tool (e.g. `500k`). Hint only.
    pub bandwidth_limit: Option<String>,
    /// Connection cap forwarded to the tool. Hint only.
    pub connections: Option<u32>,
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            command: "wget".to_string(),
            args: vec![
                "--mirror".to_string(),
                "--no-parent".to_string(),
                "--adjust-extension".to_string(),
                "--quiet".to_string(),
                "-P".to_string(),
                "{dir}".to_string(),
                "{url}".to_string(),
            ],
            bandwidth_limit: None,
            connections: None,
        }
    }
}

struct MirrorIndex {
    // Keeps the temp dir alive as long as results may be served from it.
    _root: tempfile::TempDir,
    pages: HashMap<String, PathBuf>,
}

pub struct MirrorFetcher {
    opts: FetchOptions,
    mirror: MirrorOptions,
    index: Mutex<Option<MirrorIndex>>,
}

impl MirrorFetcher {
    pub fn new(opts: FetchOptions, mirror: MirrorOptions) -> Self {
        Self {
            opts,
            mirror,
            index: Mutex::new(None),
        }
    }

    async fn fetch_inner(&self, url: &Url) -> Result<FetchResult, FetchError> {
        let mut guard = self.index.lock().await;
        if guard.is_none() {
            *guard = Some(self.run_mirror_tool(url).await?);
        }
        let index = guard.as_ref().expect("index populated above");

        let key = urlnorm::normalize_key(url.as_str(), None, false)
            .map_err(|e| FetchError::Network(format!("unmirrorable URL: {e}")))?;
        let path = index
            .pages
            .get(&key)
            .ok_or_else(|| FetchError::Http4xx(404))?
            .clone();
        drop(guard);

        let body = tokio::fs::read(&path)
            .await
            .map_err(|e| FetchError::Network(format!("mirror read {}: {e}", path.display())))?;
        if body.len() > self.opts.max_body_bytes {
            return Err(FetchError::Oversize(self.opts.max_body_bytes));
        }

        Ok(FetchResult {
            status_code: 200,
            headers: vec![("content-type".to_string(), "text/html".to_string())],
            body,
            final_url: url.clone(),
            content_type: Some("text/html".to_string()),
            encoding: None,
        })
    }

    /// Run the external tool against `seed` and index its output tree.
    async fn run_mirror_tool(&self, seed: &Url) -> Result<MirrorIndex, FetchError> {
        let root = tempfile::tempdir()
            .map_err(|e| FetchError::Network(format!("mirror tempdir: {e}")))?;
        let dir = root.path().to_string_lossy().to_string();

        let mut args: Vec<String> = self
            .mirror
            .args
            .iter()
            .map(|a| a.replace("{dir}", &dir).replace("{url}", seed.as_str()))
            .collect();
        if !self.mirror.args.iter().any(|a| a.contains("{dir}") || a.contains("{url}")) {
            args.push(dir.clone());
            args.push(seed.to_string());
        }
        if self.mirror.command == "wget" {
            args.push(format!("--user-agent={}", self.opts.user_agent));
            if let Some(limit) = &self.mirror.bandwidth_limit {
                args.push(format!("--limit-rate={limit}"));
            }
        } else if self.mirror.bandwidth_limit.is_some() || self.mirror.connections.is_some() {
            debug!(
                target: "webmirror::fetch",
                "mirror limits configured but not understood by {}, ignoring", self.mirror.command
            );
        }

        info!(
            target: "webmirror::fetch",
            "running mirror tool: {} {}", self.mirror.command, args.join(" ")
        );
        let status = tokio::process::Command::new(&self.mirror.command)
            .args(&args)
            .status()
            .await
            .map_err(|e| FetchError::Network(format!("spawn {}: {e}", self.mirror.command)))?;
        // wget exits nonzero for partial failures while still producing
        // usable output, so only a missing output tree is fatal.
        if !status.success() {
            warn!(
                target: "webmirror::fetch",
                "mirror tool exited with {status}, indexing what it produced"
            );
        }

        let pages = index_output(root.path(), seed)?;
        if pages.is_empty() {
            return Err(FetchError::Network(format!(
                "mirror tool produced no pages under {dir}"
            )));
        }
        info!(target: "webmirror::fetch", "mirror tool produced {} page(s)", pages.len());

        Ok(MirrorIndex { _root: root, pages })
    }
}

impl Fetcher for MirrorFetcher {
    fn fetch<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<FetchResult, FetchError>> {
        Box::pin(self.fetch_inner(url))
    }

    fn name(&self) -> &'static str {
        "mirror"
    }
}

/// Walk the tool's output tree and reconstruct the URL each file mirrors.
/// Layout convention is `<host>/<path...>`, with `index.html` standing in
/// for a directory URL — the same convention the writer uses.
fn index_output(root: &Path, seed: &Url) -> Result<HashMap<String, PathBuf>, FetchError> {
    let mut pages = HashMap::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = std::fs::read_dir(&dir)
            .map_err(|e| FetchError::Network(format!("walk {}: {e}", dir.display())))?;
        for entry in entries {
            let entry = entry.map_err(|e| FetchError::Network(e.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            if let Some(url) = url_for_file(root, &path, seed)
                && let Ok(key) = urlnorm::normalize_key(url.as_str(), None, false)
            {
                pages.insert(key, path);
            }
        }
    }
    Ok(pages)
}

fn url_for_file(root: &Path, file: &Path, seed: &Url) -> Option<Url> {
    let relative = file.strip_prefix(root).ok()?;
    let mut components = relative.components();
    let host = components.next()?.as_os_str().to_str()?.to_string();

    let segments: Vec<&str> = components
        .filter_map(|c| c.as_os_str().to_str())
        .collect();
    let path = match segments.split_last() {
        None => "/".to_string(),
        Some((&"index.html", init)) if init.is_empty() => "/".to_string(),
        Some((&"index.html", init)) => format!("/{}/", init.join("/")),
        Some((last, init)) if init.is_empty() => format!("/{last}"),
        Some((last, init)) => format!("/{}/{last}", init.join("/")),
    };

    Url::parse(&format!("{}://{host}{path}", seed.scheme())).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconstructs_urls_from_mirror_layout() {
        let root = Path::new("/tmp/mirror");
        let seed = Url::parse("https://example.com/").unwrap();

        let cases = [
            ("example.com/index.html", "https://example.com/"),
            ("example.com/docs/index.html", "https://example.com/docs/"),
            ("example.com/docs/guide.html", "https://example.com/docs/guide.html"),
        ];
        for (file, expected) in cases {
            let url = url_for_file(root, &root.join(file), &seed).unwrap();
            assert_eq!(url.as_str(), expected);
        }
    }

    #[tokio::test]
    async fn indexes_and_serves_a_fake_mirror_tree() {
        let opts = FetchOptions {
            user_agent: "webmirror-test".to_string(),
            timeout: std::time::Duration::from_secs(5),
            max_body_bytes: 1 << 20,
        };
        // "Mirror tool" is a shell snippet that fabricates the output tree.
        let mirror = MirrorOptions {
            command: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                "mkdir -p {dir}/example.com/docs && \
                 echo '<html><title>root</title></html>' > {dir}/example.com/index.html && \
                 echo '<html><title>docs</title></html>' > {dir}/example.com/docs/index.html"
                    .to_string(),
            ],
            bandwidth_limit: None,
            connections: None,
        };
        let fetcher = MirrorFetcher::new(opts, mirror);

        let root = Url::parse("https://example.com/").unwrap();
        let result = fetcher.fetch(&root).await.unwrap();
        assert_eq!(result.status_code, 200);
        assert!(String::from_utf8_lossy(&result.body).contains("root"));

        let docs = Url::parse("https://example.com/docs/").unwrap();
        let result = fetcher.fetch(&docs).await.unwrap();
        assert!(String::from_utf8_lossy(&result.body).contains("docs"));

        let missing = Url::parse("https://example.com/absent").unwrap();
        assert!(matches!(
            fetcher.fetch(&missing).await,
            Err(FetchError::Http4xx(404))
        ));
    }
}
