//! Config path validation and prefix/glob matching.
//!
//! Paths are slash-delimited, non-empty segments. `.`, `..`, empty segments,
//! and backslashes are always invalid; `*` is invalid outside glob mode.
//! Glob mode is only entered for `keys(prefix)` lookups where the prefix
//! itself contains a `*` — registered paths and write targets never do.

use super::types::CommandFailure;

/// Validate a config path (or a glob prefix, when `glob` is true).
///
/// Rejects: leading/trailing slash, empty segments (`a//b`), `.`, `..`,
/// backslashes, and (outside glob mode) `*`.
pub fn validate_path(path: &str, glob: bool) -> Result<(), CommandFailure> {
    let invalid = || CommandFailure::InvalidPath { path: path.to_string() };

    if path.is_empty() || path.starts_with('/') || path.ends_with('/') || path.contains('\\') {
        return Err(invalid());
    }
    if !glob && path.contains('*') {
        return Err(invalid());
    }
    for segment in path.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(invalid());
        }
        if !glob && segment.contains('*') {
            return Err(invalid());
        }
    }
    Ok(())
}

/// Does `key` match the given optional prefix per the registry's three-way
/// prefix semantics?
///
/// - `None` (absent prefix): matches everything.
/// - `Some(p)` without `*`: matches `p` exactly or anything starting with
///   `p/` (path-scoped, descendants included).
/// - `Some(p)` with `*`: `*` matches any substring (glob).
pub fn matches_prefix(key: &str, prefix: Option<&str>) -> bool {
    match prefix {
        None => true,
        Some(p) if p.contains('*') => glob_match(p, key),
        Some(p) => key == p || key.starts_with(&format!("{p}/")),
    }
}

/// Minimal `*`-only glob matcher (no `?`, no character classes).
fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }

    let mut pos = 0usize;
    let anchored_start = !pattern.starts_with('*');
    let anchored_end = !pattern.ends_with('*');

    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 && anchored_start {
            if !text[pos..].starts_with(part) {
                return false;
            }
            pos += part.len();
        } else if i == parts.len() - 1 && anchored_end {
            return text[pos..].ends_with(part);
        } else {
            match text[pos..].find(part) {
                Some(found) => pos += found + part.len(),
                None => return false,
            }
        }
    }
    true
}
