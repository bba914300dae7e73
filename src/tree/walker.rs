//! Recursive namespace walk

use crate::store::{TEMP_FILE_PREFIX, VERSIONS_DIR};
use crate::tree::metadata::describe_entry;
use crate::types::FileMetadata;
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

/// True for user-relative paths that never show up in listings: hidden
/// top-level entries, anything under a `.versions` directory, and in-flight
/// temp files.
pub fn is_excluded(rel_path: &str) -> bool {
    if rel_path.starts_with('.') {
        return true;
    }
    rel_path
        .split('/')
        .any(|segment| segment == VERSIONS_DIR || segment.starts_with(TEMP_FILE_PREFIX))
}

/// Relative forward-slash form of `path` under `base`, if representable.
fn relative(base: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        parts.push(component.as_os_str().to_str()?);
    }
    Some(parts.join("/"))
}

/// Every entry under `user_base` except the root itself and excluded paths.
///
/// Symlinks are not followed. Entries whose metadata fails are skipped.
pub fn walk(user_base: &Path) -> Vec<FileMetadata> {
    let mut entries = Vec::new();

    let walker = WalkDir::new(user_base)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| match relative(user_base, e.path()) {
            Some(rel) => !is_excluded(&rel),
            None => true,
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry during walk");
                continue;
            }
        };
        let Some(rel) = relative(user_base, entry.path()) else {
            warn!(path = %entry.path().display(), "Skipping entry with non UTF-8 path");
            continue;
        };
        match describe_entry(entry.path(), &rel) {
            Ok(meta) => entries.push(meta),
            Err(e) => warn!(path = %rel, error = %e, "Skipping entry with unreadable metadata"),
        }
    }

    entries
}
