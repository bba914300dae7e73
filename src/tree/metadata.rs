//! Single-entry metadata

use crate::hash::hash_file;
use crate::path::file_name;
use crate::types::FileMetadata;
use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::Path;

/// Stat `full_path` and build its metadata under the user-relative `rel_path`.
///
/// Symlinks are resolved, so a dangling link fails here. Files are hashed from
/// disk on every call.
pub fn describe_entry(full_path: &Path, rel_path: &str) -> io::Result<FileMetadata> {
    let meta = fs::metadata(full_path)?;
    let is_dir = meta.is_dir();
    let hash = if is_dir {
        None
    } else {
        Some(hash_file(full_path)?)
    };
    let mod_time: DateTime<Utc> = meta.modified()?.into();

    Ok(FileMetadata {
        name: file_name(rel_path).to_string(),
        path: rel_path.to_string(),
        size: i64::try_from(meta.len()).unwrap_or(i64::MAX),
        is_dir,
        mod_time,
        hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use tempfile::TempDir;

    #[test]
    fn file_entry_carries_hash() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("docs")).unwrap();
        let full = dir.path().join("docs/a.txt");
        fs::write(&full, b"abc").unwrap();

        let meta = describe_entry(&full, "docs/a.txt").unwrap();
        assert_eq!(meta.name, "a.txt");
        assert_eq!(meta.path, "docs/a.txt");
        assert_eq!(meta.size, 3);
        assert!(!meta.is_dir);
        assert_eq!(meta.hash.as_deref(), Some(hash_bytes(b"abc").as_str()));
    }

    #[test]
    fn directory_entry_has_no_hash() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("docs")).unwrap();

        let meta = describe_entry(&dir.path().join("docs"), "docs").unwrap();
        assert!(meta.is_dir);
        assert!(meta.hash.is_none());
    }

    #[test]
    fn missing_entry_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = describe_entry(&dir.path().join("nope"), "nope").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
