//! Result listing and download over the service proxy.
//!
//! The results server publishes `_manifest.json`, a JSON array of file paths
//! relative to its root. Servers without a manifest are read through their
//! HTML directory listing instead: only `<a href>` anchors are considered,
//! and links ending in `/` are followed as subdirectories.

use std::sync::LazyLock;

use regex::Regex;

use super::ResultSet;
use crate::error::{KeteError, Result};

static ANCHOR_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\s(?:[^>]*?\s)?href\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#)
        .expect("anchor regex is valid")
});

/// Maximum directory depth followed in an HTML listing.
pub const MAX_LISTING_DEPTH: usize = 8;

/// Extract relative file and directory links from an HTML listing.
///
/// Parent, absolute, query and fragment links are dropped.
pub fn parse_listing(html: &str) -> Vec<String> {
    let mut links = Vec::new();
    for cap in ANCHOR_HREF.captures_iter(html) {
        let Some(href) = cap.get(1).or_else(|| cap.get(2)).or_else(|| cap.get(3)) else {
            continue;
        };
        let href = href.as_str().trim();
        if href.is_empty()
            || href.starts_with('/')
            || href.starts_with('?')
            || href.starts_with('#')
            || href.starts_with("..")
            || href.starts_with("./")
            || href.contains("://")
            || href.starts_with("mailto:")
        {
            continue;
        }
        if !links.iter().any(|l| l == href) {
            links.push(href.to_string());
        }
    }
    links
}

/// Parse `_manifest.json` into a list of relative paths.
pub fn parse_manifest(body: &[u8]) -> Result<Vec<String>> {
    let files: Vec<String> = serde_json::from_slice(body)
        .map_err(|e| KeteError::ResultRetrieval(format!("invalid results manifest: {e}")))?;

    for file in &files {
        if file.is_empty() || file.starts_with('/') || file.split('/').any(|part| part == "..") {
            return Err(KeteError::ResultRetrieval(format!(
                "manifest entry {file:?} is not a relative path"
            )));
        }
    }
    Ok(files)
}

/// Decode `%XX` escapes in a link into the file name used as result key.
pub fn percent_decode(input: &str) -> String {
    urlencoding::decode(input).map_or_else(
        |_| String::from_utf8_lossy(&urlencoding::decode_binary(input.as_bytes())).into_owned(),
        std::borrow::Cow::into_owned,
    )
}

/// Insert a downloaded file, keyed by its decoded relative path.
pub fn insert_result(results: &mut ResultSet, link: &str, body: Vec<u8>) {
    results.insert(percent_decode(link), body);
}
