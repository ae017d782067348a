//! End-to-end crawl scenarios against a local HTTP fixture.
//!
//! These drive the full pipeline — scheduler, safety gates, robots,
//! fetch, extraction, dedup, writer, store — through `SessionController`
//! the same way the binary does. The SSRF gate is disabled because the
//! fixture server lives on loopback.

use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use webmirror::config::CrawlConfig;
use webmirror::dedup::DedupOptions;
use webmirror::session::{CrawlError, SessionController};
use webmirror::store::{SessionStatus, Store};

fn test_config(server_url: &str, output: &Path) -> CrawlConfig {
    CrawlConfig::builder()
        .output_dir(output)
        .start_url(server_url)
        .unwrap()
        .max_depth(2)
        .request_delay(Duration::ZERO)
        .concurrent_requests(4)
        .retry_count(0)
        .resume_scan_limit(50)
        .ssrf_check(false)
        .build()
        .unwrap()
}

/// Authority directory the writer mirrors a loopback fixture into,
/// e.g. `127.0.0.1_37293`.
fn authority_dir(server_url: &str) -> String {
    let url = url::Url::parse(server_url).unwrap();
    format!("{}_{}", url.host_str().unwrap(), url.port().unwrap())
}

async fn robots_ok(server: &mut mockito::ServerGuard) {
    server
        .mock("GET", "/robots.txt")
        .with_status(404)
        .create_async()
        .await;
}

#[tokio::test]
async fn basic_crawl_writes_pages_and_metadata() {
    let mut server = mockito::Server::new_async().await;
    robots_ok(&mut server).await;
    let root = server
        .mock("GET", "/")
        .with_status(200)
        .with_header("content-type", "text/html; charset=utf-8")
        .with_body(
            r#"<html><head><title>Root</title></head>
               <body><a href="/a">a</a> <a href="https://other.example/">ext</a></body></html>"#,
        )
        .expect(1)
        .create_async()
        .await;
    let page_a = server
        .mock("GET", "/a")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<html><title>A</title><p>page a</p></html>")
        .expect(1)
        .create_async()
        .await;

    let out = TempDir::new().unwrap();
    let config = test_config(&format!("{}/", server.url()), out.path());
    let controller = SessionController::new(config).await.unwrap();
    let summary = controller.run(CancellationToken::new()).await.unwrap();

    assert_eq!(summary.status, SessionStatus::Completed);
    assert_eq!(summary.pages_success, 2);
    assert_eq!(summary.pages_failed, 0);
    root.assert_async().await;
    page_a.assert_async().await;

    let host_dir = out.path().join(authority_dir(&server.url()));
    assert!(host_dir.join("index.html").is_file());
    assert!(host_dir.join("index.meta.json").is_file());
    assert!(host_dir.join("a/index.html").is_file());
    assert!(host_dir.join("a/index.meta.json").is_file());
    // The external host was never admitted.
    assert!(!out.path().join("other.example").exists());

    let sidecar: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(host_dir.join("index.meta.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(sidecar["title"], "Root");
    assert_eq!(sidecar["status_code"], 200);

    // Every materialized page has exactly one row pointing at it.
    let store = Store::open(out.path()).await.unwrap();
    let rows = store.list_all_scraped().await.unwrap();
    assert_eq!(rows.len(), 2);
    for row in &rows {
        let file = row.target_filename.as_ref().expect("page was written");
        assert!(out.path().join(file).is_file(), "{file} missing");
    }
}

#[tokio::test]
async fn canonical_mismatch_redirects_instead_of_writing() {
    let mut server = mockito::Server::new_async().await;
    robots_ok(&mut server).await;
    let page = r#"<html><head><link rel="canonical" href="/p"></head>
                  <body><p>canonical body</p></body></html>"#;
    server
        .mock("GET", "/p")
        .match_query(mockito::Matcher::UrlEncoded("utm".into(), "1".into()))
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(page)
        .expect(1)
        .create_async()
        .await;
    server
        .mock("GET", "/p")
        .match_query(mockito::Matcher::Missing)
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(page)
        .expect(1)
        .create_async()
        .await;

    let out = TempDir::new().unwrap();
    let config = test_config(&format!("{}/p?utm=1", server.url()), out.path());
    let controller = SessionController::new(config).await.unwrap();
    let summary = controller.run(CancellationToken::new()).await.unwrap();
    assert_eq!(summary.status, SessionStatus::Completed);

    let store = Store::open(out.path()).await.unwrap();
    let rows = store.list_all_scraped().await.unwrap();
    assert_eq!(rows.len(), 2, "variant and canonical each get a row");

    let variant = rows.iter().find(|r| r.url.contains("utm=1")).unwrap();
    assert!(variant.canonical_url.is_some());
    assert!(variant.target_filename.is_none());

    let canonical = rows.iter().find(|r| !r.url.contains("utm=1")).unwrap();
    assert!(canonical.target_filename.is_some());

    // Only the canonical produced a file.
    let host_dir = out.path().join(authority_dir(&server.url()));
    let written: Vec<_> = walk_files(&host_dir)
        .into_iter()
        .filter(|p| p.ends_with(".html"))
        .collect();
    assert_eq!(written.len(), 1, "exactly one HTML file: {written:?}");
}

#[tokio::test]
async fn duplicate_content_is_stored_once() {
    let mut server = mockito::Server::new_async().await;
    robots_ok(&mut server).await;
    server
        .mock("GET", "/")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(r#"<a href="/x">x</a> <a href="/y">y</a>"#)
        .create_async()
        .await;
    // Same text, different whitespace.
    server
        .mock("GET", "/x")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<p>shared   content</p>")
        .create_async()
        .await;
    server
        .mock("GET", "/y")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<p>shared\ncontent</p>")
        .create_async()
        .await;

    let out = TempDir::new().unwrap();
    let config = test_config(&format!("{}/", server.url()), out.path());
    let controller = SessionController::new(config).await.unwrap();
    let summary = controller.run(CancellationToken::new()).await.unwrap();
    assert_eq!(summary.pages_success, 3);

    let store = Store::open(out.path()).await.unwrap();
    let rows = store.list_all_scraped().await.unwrap();
    let x = rows.iter().find(|r| r.url.ends_with("/x")).unwrap();
    let y = rows.iter().find(|r| r.url.ends_with("/y")).unwrap();

    assert_eq!(x.content_checksum, y.content_checksum);
    assert!(x.content_checksum.is_some());
    // Exactly one of the twins was materialized.
    let materialized = [x, y].iter().filter(|r| r.target_filename.is_some()).count();
    assert_eq!(materialized, 1);
    assert_eq!(store.stats().await.unwrap().checksums, 2); // root + shared text
}

#[tokio::test]
async fn path_restriction_defaults_to_start_directory() {
    let mut server = mockito::Server::new_async().await;
    robots_ok(&mut server).await;
    server
        .mock("GET", "/api/index.html")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(r#"<a href="/blog/post">out</a> <a href="/api/v2/foo">in</a>"#)
        .expect(1)
        .create_async()
        .await;
    server
        .mock("GET", "/api/v2/foo")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<p>allowed</p>")
        .expect(1)
        .create_async()
        .await;
    let blog = server
        .mock("GET", "/blog/post")
        .with_status(200)
        .expect(0)
        .create_async()
        .await;

    let out = TempDir::new().unwrap();
    let config = test_config(&format!("{}/api/index.html", server.url()), out.path());
    let controller = SessionController::new(config).await.unwrap();
    let summary = controller.run(CancellationToken::new()).await.unwrap();

    assert_eq!(summary.pages_success, 2);
    blog.assert_async().await;
}

#[tokio::test]
async fn interrupt_and_resume_without_refetching() {
    let mut server = mockito::Server::new_async().await;
    robots_ok(&mut server).await;
    let root = server
        .mock("GET", "/")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(r#"<a href="/a">a</a> <a href="/b">b</a>"#)
        .expect(1)
        .create_async()
        .await;
    let page_a = server
        .mock("GET", "/a")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<p>page a</p>")
        .expect(1)
        .create_async()
        .await;
    let page_b = server
        .mock("GET", "/b")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<p>page b</p>")
        .expect(1)
        .create_async()
        .await;

    let out = TempDir::new().unwrap();

    // First run stops at the page budget, leaving /a and /b undone.
    let config = CrawlConfig::builder()
        .output_dir(out.path())
        .start_url(format!("{}/", server.url()))
        .unwrap()
        .max_depth(2)
        .max_pages(1)
        .request_delay(Duration::ZERO)
        .concurrent_requests(1)
        .retry_count(0)
        .ssrf_check(false)
        .build()
        .unwrap();
    let controller = SessionController::new(config).await.unwrap();
    let first = controller.run(CancellationToken::new()).await.unwrap();
    assert_eq!(first.pages_success, 1);

    // Second run resumes: the root is not re-fetched (its mock allows a
    // single hit), the outstanding pages are.
    let config = test_config(&format!("{}/", server.url()), out.path());
    let controller = SessionController::new(config).await.unwrap();
    let second = controller.run(CancellationToken::new()).await.unwrap();
    assert_eq!(second.status, SessionStatus::Completed);

    let store = Store::open(out.path()).await.unwrap();
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.successful_urls, 3);
    // Each page was fetched exactly once across both runs.
    root.assert_async().await;
    page_a.assert_async().await;
    page_b.assert_async().await;
}

#[tokio::test]
async fn max_pages_is_a_hard_budget_under_concurrency() {
    let mut server = mockito::Server::new_async().await;
    robots_ok(&mut server).await;
    server
        .mock("GET", "/")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(r#"<a href="/a">a</a> <a href="/b">b</a> <a href="/c">c</a>"#)
        .create_async()
        .await;
    for path in ["/a", "/b", "/c"] {
        server
            .mock("GET", path)
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(format!("<p>page {path}</p>"))
            .create_async()
            .await;
    }

    let out = TempDir::new().unwrap();
    // More ready URLs than budget, and enough workers to overshoot if the
    // budget were only checked against completed pages.
    let config = CrawlConfig::builder()
        .output_dir(out.path())
        .start_url(format!("{}/", server.url()))
        .unwrap()
        .max_depth(2)
        .max_pages(2)
        .request_delay(Duration::ZERO)
        .concurrent_requests(4)
        .retry_count(0)
        .ssrf_check(false)
        .build()
        .unwrap();
    let controller = SessionController::new(config).await.unwrap();
    let summary = controller.run(CancellationToken::new()).await.unwrap();

    assert_eq!(summary.status, SessionStatus::Completed);
    assert_eq!(summary.pages_success, 2);
    assert_eq!(summary.pages_failed, 0);

    let store = Store::open(out.path()).await.unwrap();
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.successful_urls, 2);
}

#[tokio::test]
async fn pre_cancelled_run_ends_interrupted() {
    let mut server = mockito::Server::new_async().await;
    robots_ok(&mut server).await;
    let root = server
        .mock("GET", "/")
        .with_status(200)
        .expect(0)
        .create_async()
        .await;

    let out = TempDir::new().unwrap();
    let config = test_config(&format!("{}/", server.url()), out.path());
    let controller = SessionController::new(config).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let summary = controller.run(cancel).await.unwrap();

    assert_eq!(summary.status, SessionStatus::Interrupted);
    assert_eq!(summary.pages_success, 0);
    root.assert_async().await;
}

#[tokio::test]
async fn ssrf_blocked_start_url_fails_the_session() {
    let out = TempDir::new().unwrap();
    // Loopback literal with the SSRF gate left on.
    let config = CrawlConfig::builder()
        .output_dir(out.path())
        .start_url("http://127.0.0.1:9/")
        .unwrap()
        .build()
        .unwrap();
    let controller = SessionController::new(config).await.unwrap();
    let err = controller.run(CancellationToken::new()).await.unwrap_err();

    match &err {
        CrawlError::SafetyBlocked(reason) => assert!(reason.contains("loopback")),
        other => panic!("expected SafetyBlocked, got {other:?}"),
    }
    assert_eq!(err.exit_code(), 1);

    let store = Store::open(out.path()).await.unwrap();
    assert_eq!(store.stats().await.unwrap().scraped_urls, 0);
    let sessions = store.list_sessions().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status, SessionStatus::Failed);
}

#[tokio::test]
async fn failed_urls_are_recorded_not_fatal() {
    let mut server = mockito::Server::new_async().await;
    robots_ok(&mut server).await;
    server
        .mock("GET", "/")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(r#"<a href="/gone">gone</a> <a href="/ok">ok</a>"#)
        .create_async()
        .await;
    server
        .mock("GET", "/gone")
        .with_status(404)
        .create_async()
        .await;
    server
        .mock("GET", "/ok")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<p>fine</p>")
        .create_async()
        .await;

    let out = TempDir::new().unwrap();
    let config = test_config(&format!("{}/", server.url()), out.path());
    let controller = SessionController::new(config).await.unwrap();
    let summary = controller.run(CancellationToken::new()).await.unwrap();

    assert_eq!(summary.status, SessionStatus::Completed);
    assert_eq!(summary.pages_success, 2);
    assert_eq!(summary.pages_failed, 1);

    let store = Store::open(out.path()).await.unwrap();
    let errors = store.list_errors().await.unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].url.ends_with("/gone"));
    assert!(errors[0].error.as_deref().unwrap().contains("http4xx"));
}

fn walk_files(root: &Path) -> Vec<String> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                out.push(path.to_string_lossy().to_string());
            }
        }
    }
    out
}
