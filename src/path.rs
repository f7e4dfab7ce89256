//! Path normalization (spec §4.1).
//!
//! Pure function, no I/O. Rejects escape-above-root even in the middle of a
//! path. Relative inputs are treated as rooted at `/`.

use crate::error::{Error, Result};

/// Normalize a path string into an absolute, canonical form.
///
/// Replaces `\` with `/`, walks segments tracking a non-negative depth
/// counter (each `..` decrements it, each real segment increments it, `.`
/// and empty segments are skipped), then resolves `.`/`..` and collapses
/// repeated `/`. The result always starts with `/` and never ends with `/`
/// unless it is exactly `/`.
pub fn normalize(path: &str) -> Result<String> {
    let converted = path.replace('\\', "/");
    if converted.is_empty() {
        return Ok("/".to_string());
    }

    let mut depth: i64 = 0;
    for part in converted.split('/') {
        if part == ".." {
            depth -= 1;
            if depth < 0 {
                return Err(Error::PathTraversal(path.to_string()));
            }
        } else if !part.is_empty() && part != "." {
            depth += 1;
        }
    }

    let mut stack: Vec<&str> = Vec::new();
    for part in converted.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            other => stack.push(other),
        }
    }

    if stack.is_empty() {
        Ok("/".to_string())
    } else {
        Ok(format!("/{}", stack.join("/")))
    }
}

/// Split a normalized, absolute path into `(parent, name)`. `npath` must
/// already be the output of [`normalize`] and must not be `/`.
pub fn split_parent_name(npath: &str) -> (String, &str) {
    debug_assert!(npath.starts_with('/'));
    match npath.rfind('/') {
        Some(0) => ("/".to_string(), &npath[1..]),
        Some(idx) => (npath[..idx].to_string(), &npath[idx + 1..]),
        None => ("/".to_string(), npath),
    }
}

/// Segments of a normalized, absolute path (empty for the root).
pub fn segments(npath: &str) -> Vec<&str> {
    npath.split('/').filter(|s| !s.is_empty()).collect()
}
