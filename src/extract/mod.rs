//! Page extraction: decoded text, metadata, canonical URL, outbound links,
//! and the normalized-text checksum used for content dedup.
//!
//! Extraction is deliberately synchronous — the parsed DOM never crosses an
//! await point, so worker futures stay `Send`.

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;
use url::Url;

use crate::urlnorm;

static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").expect("static selector"));
static META: Lazy<Selector> = Lazy::new(|| Selector::parse("meta").expect("static selector"));
static CANONICAL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("link[rel=\"canonical\"]").expect("static selector"));
static ANCHORS: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("static selector"));

/// Elements whose text never contributes to the content checksum.
const SKIPPED_TEXT_PARENTS: &[&str] = &["script", "style", "noscript", "template"];

/// Everything the pipeline needs from one fetched page.
#[derive(Debug, Clone)]
pub struct PageData {
    pub title: Option<String>,
    pub description: Option<String>,
    /// `og:*` properties in document order.
    pub og: Vec<(String, String)>,
    /// Canonical URL, normalized, when the page declares one.
    pub canonical: Option<Url>,
    /// Absolute, normalized outbound links.
    pub links: Vec<Url>,
    /// Tag-free, whitespace-collapsed, NFC-normalized page text.
    pub normalized_text: String,
    /// SHA-256 hex digest of `normalized_text`.
    pub checksum: String,
}

/// Decode and dissect a fetched body.
///
/// `declared_encoding` is the charset from the transport layer; when
/// absent the document's `<meta charset>` is consulted, and UTF-8 is the
/// final fallback (the right default for `text/*`).
pub fn extract(
    final_url: &Url,
    body: &[u8],
    declared_encoding: Option<&str>,
    strip_query: bool,
) -> PageData {
    let text = decode_body(body, declared_encoding);
    let document = Html::parse_document(&text);

    let title = document
        .select(&TITLE)
        .next()
        .map(|t| collapse_whitespace(&t.text().collect::<String>()))
        .filter(|t| !t.is_empty());

    let mut description = None;
    let mut og = Vec::new();
    for meta in document.select(&META) {
        let element = meta.value();
        let content = match element.attr("content") {
            Some(c) => c.trim(),
            None => continue,
        };
        if element.attr("name").is_some_and(|n| n.eq_ignore_ascii_case("description")) {
            if description.is_none() && !content.is_empty() {
                description = Some(content.to_string());
            }
        } else if let Some(property) = element.attr("property")
            && property.starts_with("og:")
        {
            og.push((property.to_string(), content.to_string()));
        }
    }

    let canonical = document
        .select(&CANONICAL)
        .next()
        .and_then(|l| l.value().attr("href"))
        .and_then(|href| urlnorm::normalize(href, Some(final_url), false).ok());

    let mut links = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for anchor in document.select(&ANCHORS) {
        let href = anchor.value().attr("href").unwrap_or_default();
        if let Ok(url) = urlnorm::normalize(href, Some(final_url), strip_query)
            && seen.insert(url.to_string())
        {
            links.push(url);
        }
    }

    let normalized_text = normalized_text(&document);
    let checksum = hex::encode(Sha256::digest(normalized_text.as_bytes()));

    PageData {
        title,
        description,
        og,
        canonical,
        links,
        normalized_text,
        checksum,
    }
}

fn decode_body(body: &[u8], declared_encoding: Option<&str>) -> String {
    let encoding = declared_encoding
        .and_then(|label| encoding_rs::Encoding::for_label(label.as_bytes()))
        .or_else(|| sniff_meta_charset(body))
        .unwrap_or(encoding_rs::UTF_8);
    let (text, _, _) = encoding.decode(body);
    text.into_owned()
}

/// Look for `charset=` in the first kilobyte, the way browsers pre-scan.
fn sniff_meta_charset(body: &[u8]) -> Option<&'static encoding_rs::Encoding> {
    let prefix = &body[..body.len().min(1024)];
    let haystack = String::from_utf8_lossy(prefix).to_lowercase();
    let pos = haystack.find("charset=")?;
    let rest = &haystack[pos + "charset=".len()..];
    let label: String = rest
        .trim_start_matches(['"', '\''])
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .collect();
    encoding_rs::Encoding::for_label(label.as_bytes())
}

/// Collect text outside script/style containers, collapse whitespace and
/// apply NFC so formatting-only differences hash identically.
fn normalized_text(document: &Html) -> String {
    let mut pieces = Vec::new();
    for node in document.tree.nodes() {
        let text = match node.value().as_text() {
            Some(t) => t,
            None => continue,
        };
        let skipped = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| SKIPPED_TEXT_PARENTS.contains(&e.name()))
        });
        if !skipped {
            pieces.push(text.to_string());
        }
    }
    let joined = pieces.join(" ");
    collapse_whitespace(&joined).nfc().collect()
}

fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}
