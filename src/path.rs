//! Helpers for working-copy relative paths (`relpath`s).
//!
//! A relpath is `/`-separated, has no leading or trailing separator and no
//! `.`/`..` segments. The working-copy root is the empty relpath.

use std::borrow::Cow;
use std::cmp::Ordering;

use crate::WcError;

fn canonicalize_rel_path(path: &str, allow_empty: bool) -> Result<Cow<'_, str>, WcError> {
    let raw = path.trim();

    #[cfg(windows)]
    if raw.starts_with("\\\\") {
        return Err(WcError::InvalidPath("unsafe path".into()));
    }

    let trimmed = raw.trim_matches(['/', '\\']);

    if trimmed.is_empty() {
        if allow_empty {
            return Ok(Cow::Borrowed(""));
        }
        return Err(WcError::InvalidPath("empty path".into()));
    }

    if trimmed.contains('\0') {
        return Err(WcError::InvalidPath("unsafe path".into()));
    }

    let mut parts: Vec<&str> = Vec::new();
    let mut needs_alloc = trimmed.contains('\\');

    for seg in trimmed.split(['/', '\\']) {
        if seg.is_empty() || seg == "." {
            needs_alloc = true;
            continue;
        }
        if seg == ".." {
            return Err(WcError::InvalidPath(format!("unsafe path: {path}")));
        }
        parts.push(seg);
    }

    if parts.is_empty() {
        if allow_empty {
            return Ok(Cow::Borrowed(""));
        }
        return Err(WcError::InvalidPath("empty path".into()));
    }

    if !needs_alloc {
        return Ok(Cow::Borrowed(trimmed));
    }

    Ok(Cow::Owned(parts.join("/")))
}

/// Canonicalizes a relpath, allowing the empty working-copy root.
pub(crate) fn validate_relpath(path: &str) -> Result<String, WcError> {
    Ok(canonicalize_rel_path(path, true)?.into_owned())
}

/// Canonicalizes a relpath that must name something below the root.
pub(crate) fn validate_child_relpath(path: &str) -> Result<String, WcError> {
    Ok(canonicalize_rel_path(path, false)?.into_owned())
}

pub(crate) fn relpath_join(base: &str, component: &str) -> String {
    match (base.is_empty(), component.is_empty()) {
        (true, _) => component.to_string(),
        (false, true) => base.to_string(),
        (false, false) => format!("{base}/{component}"),
    }
}

pub(crate) fn relpath_dirname(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some((dir, _)) => dir,
        None => "",
    }
}

pub(crate) fn relpath_basename(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some((_, name)) => name,
        None => path,
    }
}

/// Number of components in `path`; the root has depth 0.
///
/// This is also the op-depth of an operation rooted at `path`.
pub(crate) fn relpath_depth(path: &str) -> u32 {
    if path.is_empty() {
        0
    } else {
        path.split('/').count() as u32
    }
}

/// Returns the part of `path` below `ancestor`, or `None` when `path` is not
/// `ancestor` or one of its descendants.
pub(crate) fn relpath_skip_ancestor<'a>(ancestor: &str, path: &'a str) -> Option<&'a str> {
    if ancestor.is_empty() {
        return Some(path);
    }
    let rest = path.strip_prefix(ancestor)?;
    if rest.is_empty() {
        Some("")
    } else {
        rest.strip_prefix('/')
    }
}

/// Returns the ancestor of `path` with exactly `depth` components.
pub(crate) fn relpath_prefix(path: &str, depth: u32) -> &str {
    if depth == 0 {
        return "";
    }
    let mut seen = 0;
    for (idx, byte) in path.bytes().enumerate() {
        if byte == b'/' {
            seen += 1;
            if seen == depth {
                return &path[..idx];
            }
        }
    }
    path
}

/// Orders paths component-wise: `/` sorts before any other byte, so a parent
/// always sorts directly before its descendants.
pub fn compare_paths(a: &str, b: &str) -> Ordering {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let common = a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count();

    match (a.get(common), b.get(common)) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(b'/'), Some(_)) => Ordering::Less,
        (Some(_), Some(b'/')) => Ordering::Greater,
        (Some(x), Some(y)) => x.cmp(y),
    }
}
