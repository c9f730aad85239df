//! Helpers for repository URLs.
//!
//! URLs are treated as `scheme://authority` followed by a `/`-separated path.
//! They are compared component-wise; no percent-decoding is performed.

use crate::WcError;
use crate::path::compare_paths;

/// Splits a URL into its `scheme://authority` root and path (without a
/// leading `/`).
fn split_root(url: &str) -> Option<(&str, &str)> {
    let scheme_end = url.find("://")?;
    let after = &url[scheme_end + 3..];
    match after.find('/') {
        Some(idx) => {
            let root_len = scheme_end + 3 + idx;
            Some((&url[..root_len], url[root_len..].trim_matches('/')))
        }
        None => Some((trim_url_end(url), "")),
    }
}

fn trim_url_end(url: &str) -> &str {
    let mut url = url;
    while url.ends_with('/') && !url.ends_with("://") {
        url = &url[..url.len() - 1];
    }
    url
}

/// Validates and normalizes a repository URL (trailing separators dropped).
pub fn canonicalize_url(input: &str) -> Result<String, WcError> {
    let input = input.trim();
    let Some((root, path)) = split_root(input) else {
        return Err(WcError::InvalidUrl(format!("missing scheme: {input}")));
    };
    let authority_start = input.find("://").map_or(0, |i| i + 3);
    if root.len() <= authority_start && !input[..authority_start].eq_ignore_ascii_case("file://") {
        return Err(WcError::InvalidUrl(format!("missing host: {input}")));
    }
    if path.split('/').any(|seg| seg == "." || seg == "..") {
        return Err(WcError::InvalidUrl(format!("unsafe url: {input}")));
    }
    Ok(url_join(root, path))
}

/// Appends a relpath to `url`.
pub fn url_join(url: &str, relpath: &str) -> String {
    let relpath = relpath.trim_matches('/');
    let url = trim_url_end(url);
    if relpath.is_empty() {
        return url.to_string();
    }
    // A bare `file://` root keeps its empty authority: `file:///path`.
    format!("{url}/{relpath}")
}

/// Returns the parent URL, never climbing above `scheme://authority`.
pub fn url_dirname(url: &str) -> String {
    match split_root(url) {
        Some((root, path)) => match path.rsplit_once('/') {
            Some((parent, _)) => url_join(root, parent),
            None => root.to_string(),
        },
        None => url.to_string(),
    }
}

/// Returns the longest URL that is an ancestor of (or equal to) both inputs,
/// or an empty string when they live on different hosts or schemes.
pub fn url_longest_ancestor(a: &str, b: &str) -> String {
    let (Some((root_a, path_a)), Some((root_b, path_b))) = (split_root(a), split_root(b)) else {
        return String::new();
    };
    if root_a != root_b {
        return String::new();
    }

    let common: Vec<&str> = path_a
        .split('/')
        .zip(path_b.split('/'))
        .take_while(|(x, y)| x == y && !x.is_empty())
        .map(|(x, _)| x)
        .collect();
    url_join(root_a, &common.join("/"))
}

/// Returns the path of `url` below `ancestor`, or `None` when `url` is not
/// `ancestor` or one of its descendants.
pub fn url_skip_ancestor<'a>(ancestor: &str, url: &'a str) -> Option<&'a str> {
    let ancestor = trim_url_end(ancestor);
    let rest = url.strip_prefix(ancestor)?;
    if rest.is_empty() {
        Some("")
    } else {
        rest.strip_prefix('/')
    }
}

/// Orders URLs the way commit drivers expect: parents directly before
/// their descendants.
pub fn compare_urls(a: &str, b: &str) -> std::cmp::Ordering {
    compare_paths(a, b)
}
