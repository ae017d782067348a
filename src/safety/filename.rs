//! Traversal-safe derivation of the mirrored on-disk path for a URL.
//!
//! The layout mirrors the site: `<host>/<path segments>/index.html`, with a
//! sidecar `<basename>.meta.json` next to every page. Every segment is
//! sanitized so the joined path can never escape the output directory.

use std::path::{Component, Path, PathBuf};

use percent_encoding::percent_decode_str;
use sha2::{Digest, Sha256};
use url::Url;

use super::SafetyError;

/// Longest single path segment we will create. Most filesystems cap
/// segments at 255 bytes; staying well below leaves room for suffixes.
const MAX_SEGMENT_LEN: usize = 100;

/// Derive the relative mirrored path for a normalized URL.
///
/// `https://example.com/docs/intro` becomes
/// `example.com/docs/intro/index.html`; a final segment that already looks
/// like a file (`guide.html`) is kept as the filename. URLs that still
/// carry a query get a short hash suffix so distinct queries never
/// overwrite each other.
pub fn safe_filename(url: &Url) -> Result<PathBuf, SafetyError> {
    let host = url
        .host_str()
        .ok_or_else(|| SafetyError::Path(format!("{url}: no host")))?;

    let mut authority = sanitize_segment(host);
    if let Some(port) = url.port() {
        authority.push('_');
        authority.push_str(&port.to_string());
    }

    let mut path = PathBuf::from(authority);

    let raw_path = url.path();
    let segments: Vec<String> = raw_path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            let decoded = percent_decode_str(s).decode_utf8_lossy().to_string();
            sanitize_segment(&decoded)
        })
        .filter(|s| !s.is_empty())
        .collect();

    let trailing_slash = raw_path.ends_with('/');
    let (dirs, file) = match segments.split_last() {
        None => (&[][..], "index.html".to_string()),
        Some((last, init)) if !trailing_slash && looks_like_file(last) => {
            (init, last.clone())
        }
        Some(_) => (&segments[..], "index.html".to_string()),
    };

    for dir in dirs {
        path.push(dir);
    }

    let file = match url.query() {
        Some(q) if !q.is_empty() => append_query_hash(&file, q),
        _ => file,
    };
    path.push(file);

    // Sanitization is supposed to make traversal impossible; verify anyway.
    for component in path.components() {
        match component {
            Component::Normal(_) => {}
            other => {
                return Err(SafetyError::Path(format!(
                    "{url}: unexpected component {other:?}"
                )));
            }
        }
    }

    Ok(path)
}

/// Sidecar metadata filename for a page file: `index.html` -> `index.meta.json`.
pub fn sidecar_name(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => format!("{stem}.meta.json"),
        _ => format!("{filename}.meta.json"),
    }
}

/// Lexical containment check for a derived path against the output root.
/// The writer re-verifies with symlinks resolved after directories exist.
pub fn is_contained(root: &Path, relative: &Path) -> bool {
    if relative.is_absolute() {
        return false;
    }
    let joined = root.join(relative);
    joined
        .components()
        .all(|c| !matches!(c, Component::ParentDir))
        && joined.starts_with(root)
}

/// Replace everything outside `[A-Za-z0-9._-]` with `_`, neutralize
/// dot-only segments, and bound the segment length.
fn sanitize_segment(segment: &str) -> String {
    let mut out: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if out.chars().all(|c| c == '.') {
        out = out.replace('.', "_");
    }

    if out.len() > MAX_SEGMENT_LEN {
        out.truncate(MAX_SEGMENT_LEN);
    }
    out
}

/// A segment counts as a file when it has a non-empty stem and extension.
fn looks_like_file(segment: &str) -> bool {
    matches!(segment.rsplit_once('.'), Some((stem, ext)) if !stem.is_empty() && !ext.is_empty())
}

fn append_query_hash(file: &str, query: &str) -> String {
    let digest = Sha256::digest(query.as_bytes());
    let tag = hex::encode(&digest[..4]);
    match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_q{tag}.{ext}"),
        _ => format!("{file}_q{tag}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn derive(raw: &str) -> PathBuf {
        safe_filename(&Url::parse(raw).unwrap()).expect("should derive")
    }

    #[test]
    fn root_maps_to_index_html() {
        assert_eq!(derive("https://example.com/"), PathBuf::from("example.com/index.html"));
    }

    #[test]
    fn extensionless_segment_becomes_directory() {
        assert_eq!(
            derive("https://example.com/a"),
            PathBuf::from("example.com/a/index.html")
        );
        assert_eq!(
            derive("https://example.com/docs/intro/"),
            PathBuf::from("example.com/docs/intro/index.html")
        );
    }

    #[test]
    fn file_segment_is_kept() {
        assert_eq!(
            derive("https://example.com/docs/guide.html"),
            PathBuf::from("example.com/docs/guide.html")
        );
    }

    #[test]
    fn traversal_is_neutralized() {
        let path = derive("https://example.com/%2e%2e/%2e%2e/etc/passwd");
        assert!(path.components().all(|c| matches!(c, Component::Normal(_))));
        assert!(path.starts_with("example.com"));
        assert!(!path.to_string_lossy().contains(".."));
    }

    #[test]
    fn odd_characters_are_replaced() {
        let path = derive("https://example.com/a%20b/c:d");
        assert_eq!(path, PathBuf::from("example.com/a_b/c_d/index.html"));
    }

    #[test]
    fn long_segments_are_bounded() {
        let long = "x".repeat(500);
        let path = derive(&format!("https://example.com/{long}/"));
        for component in path.components() {
            assert!(component.as_os_str().len() <= MAX_SEGMENT_LEN);
        }
    }

    #[test]
    fn nonstandard_port_lands_in_authority_dir() {
        assert_eq!(
            derive("https://example.com:8443/a/"),
            PathBuf::from("example.com_8443/a/index.html")
        );
    }

    #[test]
    fn queries_get_distinct_filenames() {
        let a = derive("https://example.com/p?x=1");
        let b = derive("https://example.com/p?x=2");
        assert_ne!(a, b);
        assert!(a.to_string_lossy().contains("_q"));
    }

    #[test]
    fn sidecar_names() {
        assert_eq!(sidecar_name("index.html"), "index.meta.json");
        assert_eq!(sidecar_name("guide.html"), "guide.meta.json");
        assert_eq!(sidecar_name("noext"), "noext.meta.json");
    }

    #[test]
    fn containment_check() {
        let root = Path::new("/tmp/out");
        assert!(is_contained(root, Path::new("example.com/index.html")));
        assert!(!is_contained(root, Path::new("/etc/passwd")));
        assert!(!is_contained(root, Path::new("../escape.html")));
    }
}
