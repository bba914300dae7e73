//! Relative path validation
//!
//! Every user-supplied path is checked here before it reaches the filesystem.
//! Validation is purely lexical; no filesystem access.

use crate::error::StoreError;
use std::path::{Component, Path};

/// Returns true if `relative_path` can be joined under a namespace root
/// without escaping it.
pub fn is_safe(relative_path: &str) -> bool {
    if relative_path.contains("..") || relative_path.contains('\0') {
        return false;
    }
    if relative_path.starts_with('/') || relative_path.starts_with('\\') {
        return false;
    }

    let path = Path::new(relative_path);
    if path.has_root() {
        return false;
    }
    if path
        .components()
        .any(|c| matches!(c, Component::Prefix(_) | Component::RootDir))
    {
        return false;
    }

    !segments(relative_path).any(|segment| segment == "..")
}

/// Split on either separator, dropping empty and `.` segments.
fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != ".")
}

/// Normalized forward-slash form. Does not check safety.
pub fn normalize(relative_path: &str) -> String {
    segments(relative_path).collect::<Vec<_>>().join("/")
}

/// Check and normalize a path that must name an entry.
pub fn validate(relative_path: &str) -> Result<String, StoreError> {
    if !is_safe(relative_path) {
        return Err(StoreError::Validation(format!(
            "unsafe path: {relative_path:?}"
        )));
    }
    let normalized = normalize(relative_path);
    if normalized.is_empty() {
        return Err(StoreError::Validation("path is empty".to_string()));
    }
    Ok(normalized)
}

/// Like [`validate`], but the empty path (and `.`, `/`) names the namespace root.
pub fn validate_dir(relative_path: &str) -> Result<String, StoreError> {
    let trimmed = relative_path.trim_start_matches(['/', '\\']);
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    if !is_safe(trimmed) {
        return Err(StoreError::Validation(format!(
            "unsafe path: {relative_path:?}"
        )));
    }
    Ok(normalize(trimmed))
}

/// Parent directory of a normalized path (`""` for the root level).
pub fn parent(normalized: &str) -> &str {
    match normalized.rfind('/') {
        Some(idx) => &normalized[..idx],
        None => "",
    }
}

/// Final segment of a normalized path.
pub fn file_name(normalized: &str) -> &str {
    match normalized.rfind('/') {
        Some(idx) => &normalized[idx + 1..],
        None => normalized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rejects_traversal_and_absolute_paths() {
        for bad in [
            "..",
            "../etc/passwd",
            "a/../../b",
            "a/..",
            "a..b",
            "/etc/passwd",
            "\\windows",
            "a\0b",
        ] {
            assert!(!is_safe(bad), "{bad:?} should be unsafe");
        }
    }

    #[test]
    fn accepts_plain_relative_paths() {
        for good in ["a.txt", "docs/a.txt", "./docs//a.txt", "a/./b", ".hidden"] {
            assert!(is_safe(good), "{good:?} should be safe");
        }
    }

    #[test]
    fn normalizes_separators_and_dots() {
        assert_eq!(normalize("./docs//notes/./a.md"), "docs/notes/a.md");
        assert_eq!(normalize("docs\\a.md"), "docs/a.md");
        assert_eq!(normalize("."), "");
    }

    #[test]
    fn validate_rejects_empty_with_validation_error() {
        assert!(validate("").unwrap_err().is_validation());
        assert!(validate("./.").unwrap_err().is_validation());
        assert!(validate("../x").unwrap_err().is_validation());
        assert_eq!(validate("a//b").unwrap(), "a/b");
    }

    #[test]
    fn validate_dir_accepts_root_aliases() {
        assert_eq!(validate_dir("").unwrap(), "");
        assert_eq!(validate_dir(".").unwrap(), "");
        assert_eq!(validate_dir("/").unwrap(), "");
        assert_eq!(validate_dir("docs/").unwrap(), "docs");
        assert!(validate_dir("/../x").is_err());
    }

    #[test]
    fn parent_and_file_name() {
        assert_eq!(parent("a/b/c.txt"), "a/b");
        assert_eq!(parent("c.txt"), "");
        assert_eq!(file_name("a/b/c.txt"), "c.txt");
        assert_eq!(file_name("c.txt"), "c.txt");
    }

    proptest! {
        #[test]
        fn any_dotdot_segment_is_unsafe(
            prefix in proptest::collection::vec("[a-z]{1,6}", 0..4),
            suffix in proptest::collection::vec("[a-z]{1,6}", 0..4),
        ) {
            let mut parts = prefix.clone();
            parts.push("..".to_string());
            parts.extend(suffix);
            let joined = parts.join("/");
            prop_assert!(!is_safe(&joined));
        }

        #[test]
        fn leading_separator_is_unsafe(
            parts in proptest::collection::vec("[a-z]{1,6}", 1..4),
            sep in prop_oneof![Just("/"), Just("\\")],
        ) {
            let joined = format!("{}{}", sep, parts.join("/"));
            prop_assert!(!is_safe(&joined));
        }

        #[test]
        fn safe_paths_normalize_within_root(
            parts in proptest::collection::vec("[a-zA-Z0-9_.-]{1,8}", 1..5),
        ) {
            let joined = parts.join("/");
            if is_safe(&joined) {
                let normalized = normalize(&joined);
                prop_assert!(!normalized.starts_with('/'));
                prop_assert!(normalized.split('/').all(|s| s != ".." && !s.is_empty()));
            }
        }
    }
}
