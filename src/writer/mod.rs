//! Disk materialization of fetched pages.
//!
//! Writes the page body and a `<basename>.meta.json` sidecar under the
//! mirrored path derived by the safety gate. Both files are written to a
//! temp file first and renamed into place, so a crash can never leave a
//! half-written file visible. Containment inside the output root is
//! re-verified with symlinks resolved after the directories exist.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use log::debug;
use serde::Serialize;

use crate::safety;

/// Sidecar header subset worth keeping for offline conversion.
const KEPT_HEADERS: &[&str] = &["content-type", "last-modified", "etag", "content-length"];

/// Content of the `.meta.json` sidecar.
#[derive(Debug, Clone, Serialize)]
pub struct PageMetadata {
    pub url: String,
    pub title: Option<String>,
    pub encoding: Option<String>,
    pub status_code: u16,
    pub headers: serde_json::Map<String, serde_json::Value>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl PageMetadata {
    /// Assemble the sidecar from fetch + extraction output.
    pub fn build(
        url: &str,
        status_code: u16,
        encoding: Option<&str>,
        headers: &[(String, String)],
        page: &crate::extract::PageData,
    ) -> Self {
        let mut kept = serde_json::Map::new();
        for (name, value) in headers {
            if KEPT_HEADERS.contains(&name.as_str()) {
                kept.insert(canonical_header_name(name), value.clone().into());
            }
        }

        let mut metadata = serde_json::Map::new();
        if let Some(description) = &page.description {
            metadata.insert("description".to_string(), description.clone().into());
        }
        for (property, content) in &page.og {
            metadata.insert(property.clone(), content.clone().into());
        }
        if let Some(canonical) = &page.canonical {
            metadata.insert("canonical".to_string(), canonical.to_string().into());
        }

        Self {
            url: url.to_string(),
            title: page.title.clone(),
            encoding: encoding.map(str::to_string),
            status_code,
            headers: kept,
            metadata,
        }
    }
}

/// Materializes pages under one output root.
pub struct Writer {
    output_root: PathBuf,
    canonical_root: PathBuf,
}

impl Writer {
    pub async fn new(output_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .with_context(|| format!("failed to create {}", output_dir.display()))?;
        let canonical_root = tokio::fs::canonicalize(output_dir)
            .await
            .with_context(|| format!("failed to resolve {}", output_dir.display()))?;
        Ok(Self {
            output_root: output_dir.to_path_buf(),
            canonical_root,
        })
    }

    /// Write page body + sidecar; returns the relative path of the HTML
    /// file for the store row.
    pub async fn write_page(
        &self,
        relative: &Path,
        body: &[u8],
        metadata: &PageMetadata,
    ) -> Result<PathBuf> {
        if !safety::is_contained(&self.output_root, relative) {
            bail!("derived path escapes output directory: {}", relative.display());
        }

        let target = self.output_root.join(relative);
        let parent = target
            .parent()
            .context("derived path has no parent directory")?;
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;

        // With the directories present, resolve symlinks and re-check.
        let resolved_parent = tokio::fs::canonicalize(parent)
            .await
            .with_context(|| format!("failed to resolve {}", parent.display()))?;
        if !resolved_parent.starts_with(&self.canonical_root) {
            bail!(
                "resolved path escapes output directory: {}",
                resolved_parent.display()
            );
        }

        let filename = relative
            .file_name()
            .and_then(|f| f.to_str())
            .context("derived path has no filename")?;
        let sidecar = resolved_parent.join(safety::sidecar_name(filename));
        let page_path = resolved_parent.join(filename);

        let sidecar_bytes = serde_json::to_vec_pretty(metadata)?;
        let body = body.to_vec();
        let dir_for_tmp = resolved_parent.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            atomic_write(&dir_for_tmp, &page_path, &body)?;
            atomic_write(&dir_for_tmp, &sidecar, &sidecar_bytes)?;
            Ok(())
        })
        .await
        .context("writer task panicked")??;

        debug!(target: "webmirror::writer", "wrote {}", relative.display());
        Ok(relative.to_path_buf())
    }
}

/// `content-type` -> `Content-Type`, matching the sidecar format.
fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

fn atomic_write(dir: &Path, target: &Path, bytes: &[u8]) -> Result<()> {
    use std::io::Write;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(target)
        .with_context(|| format!("failed to persist {}", target.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract;
    use tempfile::TempDir;
    use url::Url;

    fn sample_metadata(url: &str) -> PageMetadata {
        let parsed = Url::parse(url).unwrap();
        let page = extract::extract(
            &parsed,
            br#"<title>T</title><meta name="description" content="d"><meta property="og:title" content="O"><p>x</p>"#,
            Some("utf-8"),
            false,
        );
        PageMetadata::build(
            url,
            200,
            Some("utf-8"),
            &[
                ("content-type".to_string(), "text/html".to_string()),
                ("x-ignored".to_string(), "nope".to_string()),
            ],
            &page,
        )
    }

    #[tokio::test]
    async fn writes_page_and_sidecar() -> Result<()> {
        let dir = TempDir::new()?;
        let writer = Writer::new(dir.path()).await?;

        let relative = Path::new("example.com/docs/index.html");
        let written = writer
            .write_page(relative, b"<html>body</html>", &sample_metadata("https://example.com/docs/"))
            .await?;
        assert_eq!(written, relative);

        let html = std::fs::read_to_string(dir.path().join(relative))?;
        assert_eq!(html, "<html>body</html>");

        let sidecar: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(
            dir.path().join("example.com/docs/index.meta.json"),
        )?)?;
        assert_eq!(sidecar["url"], "https://example.com/docs/");
        assert_eq!(sidecar["title"], "T");
        assert_eq!(sidecar["status_code"], 200);
        assert_eq!(sidecar["headers"]["Content-Type"], "text/html");
        assert!(sidecar["headers"].get("x-ignored").is_none());
        assert_eq!(sidecar["metadata"]["description"], "d");
        assert_eq!(sidecar["metadata"]["og:title"], "O");
        Ok(())
    }

    #[tokio::test]
    async fn refuses_paths_outside_the_root() -> Result<()> {
        let dir = TempDir::new()?;
        let writer = Writer::new(dir.path()).await?;
        let err = writer
            .write_page(
                Path::new("../escape.html"),
                b"x",
                &sample_metadata("https://example.com/"),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("escapes output directory"));
        Ok(())
    }
}
