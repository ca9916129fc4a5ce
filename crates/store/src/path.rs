//! Helpers for the `/`-separated absolute paths used by every backend.

use crate::StoreError;

/// Splits an absolute path into its segments.
///
/// # Errors
///
/// [`StoreError::InvalidArgument`] unless the path starts with `/` and
/// every segment is non-empty and free of `.` (reserved by the live
/// backend's key mapping).
pub fn split(path: &str) -> Result<Vec<&str>, StoreError> {
    let Some(rest) = path.strip_prefix('/') else {
        return Err(StoreError::InvalidArgument(format!(
            "path must be absolute: {path}"
        )));
    };
    if rest.is_empty() {
        return Ok(Vec::new());
    }
    let segments: Vec<&str> = rest.split('/').collect();
    for segment in &segments {
        if segment.is_empty() || segment.contains('.') {
            return Err(StoreError::InvalidArgument(format!(
                "bad path segment {segment:?} in {path}"
            )));
        }
    }
    Ok(segments)
}

/// The parent of a path, or `None` at the root.
#[must_use]
pub fn parent(path: &str) -> Option<&str> {
    let idx = path.rfind('/')?;
    if idx == 0 {
        (path.len() > 1).then_some("/")
    } else {
        Some(&path[..idx])
    }
}

/// The last segment of a path.
#[must_use]
pub fn leaf(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Returns true when `path` equals `prefix` or lies beneath it.
#[must_use]
pub fn is_under(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return path.starts_with('/');
    }
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_valid() {
        assert_eq!(split("/a/b/c").unwrap(), vec!["a", "b", "c"]);
        assert_eq!(split("/").unwrap(), Vec::<&str>::new());
    }

    #[test]
    fn test_split_rejects_bad_paths() {
        assert!(split("relative").is_err());
        assert!(split("/a//b").is_err());
        assert!(split("/a/b.c").is_err());
    }

    #[test]
    fn test_parent_and_leaf() {
        assert_eq!(parent("/a/b/c"), Some("/a/b"));
        assert_eq!(parent("/a"), Some("/"));
        assert_eq!(parent("/"), None);
        assert_eq!(leaf("/a/b/c"), "c");
    }

    #[test]
    fn test_is_under() {
        assert!(is_under("/a/b", "/a"));
        assert!(is_under("/a", "/a"));
        assert!(is_under("/a/b", "/"));
        assert!(!is_under("/ab", "/a"));
        assert!(!is_under("/b", "/a"));
    }
}
