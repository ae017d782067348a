//! URL normalization for deterministic store keys.
//!
//! Every URL that enters the frontier, the store, or the dedup engine goes
//! through [`normalize`] first, so that the same page is never tracked under
//! two spellings. Normalization is idempotent: applying it twice yields the
//! same string as applying it once.

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, percent_encode};
use thiserror::Error;
use url::Url;

/// Bytes that stay percent-encoded in a path segment. Everything else is
/// decoded, so unreserved characters always appear literally.
const SEGMENT_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'\\')
    .add(b'^')
    .add(b'|');

/// Bytes that stay percent-encoded in a query component.
const QUERY_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'=')
    .add(b'<')
    .add(b'>');

/// Why a raw URL was rejected by the normalizer.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("malformed URL: {0}")]
    Malformed(String),
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),
    #[error("URL carries userinfo")]
    Userinfo,
    #[error("URL has no host")]
    NoHost,
}

/// Normalize a raw URL, optionally resolving it against `base`.
///
/// Applies, in order: relative resolution, scheme check (`http`/`https`
/// only), userinfo rejection, host lowercasing and default-port stripping
/// (done by the `url` crate), dot-segment collapse, fragment removal,
/// canonical percent-encoding of path and query, and a stable bytewise sort
/// of query parameters. With `strip_query` the query is dropped entirely.
pub fn normalize(
    raw: &str,
    base: Option<&Url>,
    strip_query: bool,
) -> Result<Url, NormalizeError> {
    let trimmed = raw.trim();
    let mut url = match base {
        Some(b) => b
            .join(trimmed)
            .map_err(|e| NormalizeError::Malformed(format!("{trimmed}: {e}")))?,
        None => Url::parse(trimmed)
            .map_err(|e| NormalizeError::Malformed(format!("{trimmed}: {e}")))?,
    };

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(NormalizeError::UnsupportedScheme(other.to_string())),
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(NormalizeError::Userinfo);
    }
    if url.host_str().is_none() {
        return Err(NormalizeError::NoHost);
    }

    url.set_fragment(None);

    let path = canonical_path(url.path());
    url.set_path(&path);

    if strip_query {
        url.set_query(None);
    } else {
        match url.query() {
            None => {}
            Some("") => url.set_query(None),
            Some(q) => {
                let sorted = canonical_query(q);
                url.set_query(Some(&sorted));
            }
        }
    }

    Ok(url)
}

/// Convenience wrapper returning the normalized URL as a `String` key.
pub fn normalize_key(
    raw: &str,
    base: Option<&Url>,
    strip_query: bool,
) -> Result<String, NormalizeError> {
    normalize(raw, base, strip_query).map(|u| u.to_string())
}

/// Re-encode each path segment: fully percent-decode, then re-encode with
/// [`SEGMENT_SET`]. A decoded `/` inside a segment is re-escaped, so the
/// segment structure never changes across passes.
fn canonical_path(path: &str) -> String {
    let segments: Vec<String> = path
        .split('/')
        .map(|segment| {
            let decoded = percent_decode_str(segment).collect::<Vec<u8>>();
            percent_encode(&decoded, SEGMENT_SET).to_string()
        })
        .collect();
    let joined = segments.join("/");
    if joined.is_empty() { "/".to_string() } else { joined }
}

/// Sort query parameters bytewise by `(key, value)` and re-encode each
/// component canonically. The sort is stable so repeated keys keep their
/// relative order of equal pairs.
fn canonical_query(query: &str) -> String {
    let mut pairs: Vec<(Vec<u8>, Option<Vec<u8>>)> = query
        .split('&')
        .filter(|c| !c.is_empty())
        .map(|component| match component.split_once('=') {
            Some((k, v)) => (
                percent_decode_str(k).collect(),
                Some(percent_decode_str(v).collect()),
            ),
            None => (percent_decode_str(component).collect(), None),
        })
        .collect();
    pairs.sort();

    let mut out = String::with_capacity(query.len());
    for (key, value) in pairs {
        if !out.is_empty() {
            out.push('&');
        }
        out.push_str(&percent_encode(&key, QUERY_SET).to_string());
        if let Some(v) = value {
            out.push('=');
            out.push_str(&percent_encode(&v, QUERY_SET).to_string());
        }
    }
    out
}
