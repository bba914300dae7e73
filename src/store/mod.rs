//! Per-user content store
//!
//! Each user owns one directory under the storage base:
//! `<base_path>/<user_id>/<relative path>`. Every operation validates its
//! path before touching the filesystem. Writes go to a temp file in the
//! target directory and are renamed into place while holding the path's
//! write lock, so readers never observe a partially written file.

use crate::concurrency::{path_key, PathLockManager};
use crate::error::StoreError;
use crate::hash::hash_file;
use crate::path::{validate, validate_dir};
use crate::tree::{describe_entry, is_excluded, walk};
use crate::types::{ChangeType, FileMetadata, UserId};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name prefix of in-flight temp files. Never listed.
pub const TEMP_FILE_PREFIX: &str = ".filesync-";

/// Reserved per-directory version subtree. Never listed.
pub const VERSIONS_DIR: &str = ".versions";

pub struct ContentStore {
    base_path: PathBuf,
    locks: PathLockManager,
}

impl ContentStore {
    /// Open (creating if needed) the storage base directory.
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_path = base_path.as_ref();
        fs::create_dir_all(base_path)?;
        let base_path = dunce::canonicalize(base_path)?;
        debug!(base = %base_path.display(), "Opened content store");
        Ok(Self {
            base_path,
            locks: PathLockManager::new(),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn user_root(&self, user: &UserId) -> PathBuf {
        self.base_path.join(user.as_str())
    }

    /// Create the user's namespace directory if it does not exist yet.
    pub fn ensure_namespace(&self, user: &UserId) -> Result<PathBuf, StoreError> {
        let root = self.user_root(user);
        if !root.is_dir() {
            fs::create_dir_all(&root)?;
            debug!(user = %user, "Created user namespace");
        }
        Ok(root)
    }

    fn full_path(&self, user: &UserId, normalized: &str) -> PathBuf {
        let mut full = self.user_root(user);
        for segment in normalized.split('/').filter(|s| !s.is_empty()) {
            full.push(segment);
        }
        full
    }

    /// Write `content` to `path`, replacing any existing file.
    pub fn store(
        &self,
        user: &UserId,
        path: &str,
        content: &[u8],
    ) -> Result<FileMetadata, StoreError> {
        self.upsert(user, path, content).map(|(_, meta)| meta)
    }

    /// Like [`ContentStore::store`], also reporting whether the file was
    /// created or replaced. The check happens under the path's lock.
    pub fn upsert(
        &self,
        user: &UserId,
        path: &str,
        content: &[u8],
    ) -> Result<(ChangeType, FileMetadata), StoreError> {
        self.upsert_if(user, path, content, Expect::Any)
    }

    /// Write `content` only if `path` is still in the `expect` state once its
    /// lock is held. Otherwise fails with [`StoreError::Modified`] and leaves
    /// the file alone.
    pub fn upsert_if(
        &self,
        user: &UserId,
        path: &str,
        content: &[u8],
        expect: Expect<'_>,
    ) -> Result<(ChangeType, FileMetadata), StoreError> {
        let rel = validate(path)?;
        let full = self.full_path(user, &rel);
        let lock = self.locks.get_lock(&path_key(user.as_str(), &rel));
        let _guard = lock.lock();

        let existed = match fs::metadata(&full) {
            Ok(meta) if meta.is_dir() => {
                return Err(StoreError::Validation(format!("{rel} is a directory")));
            }
            Ok(_) => true,
            Err(_) => false,
        };
        check_expected(&full, &rel, expect)?;

        let parent = full
            .parent()
            .ok_or_else(|| StoreError::Validation(format!("{rel} has no parent")))?;
        fs::create_dir_all(parent)?;
        write_atomic(parent, &full, content)?;

        let meta = describe_entry(&full, &rel).map_err(|e| StoreError::from_io(e, &rel))?;
        debug!(user = %user, path = %rel, size = meta.size, existed, "Stored file");
        let kind = if existed {
            ChangeType::Update
        } else {
            ChangeType::Create
        };
        Ok((kind, meta))
    }

    pub fn get(&self, user: &UserId, path: &str) -> Result<Vec<u8>, StoreError> {
        let rel = validate(path)?;
        let full = self.full_path(user, &rel);
        let meta = fs::metadata(&full).map_err(|e| StoreError::from_io(e, &rel))?;
        if meta.is_dir() {
            return Err(StoreError::Validation(format!("{rel} is a directory")));
        }
        let content = fs::read(&full).map_err(|e| StoreError::from_io(e, &rel))?;
        debug!(user = %user, path = %rel, size = content.len(), "Read file");
        Ok(content)
    }

    /// Remove a file or an empty directory.
    pub fn delete(&self, user: &UserId, path: &str) -> Result<(), StoreError> {
        self.delete_if(user, path, Expect::Any).map(|_| ())
    }

    /// Remove `path` if it is still in the `expect` state, returning the
    /// metadata it had just before removal.
    pub fn delete_if(
        &self,
        user: &UserId,
        path: &str,
        expect: Expect<'_>,
    ) -> Result<FileMetadata, StoreError> {
        let rel = validate(path)?;
        let full = self.full_path(user, &rel);
        let lock = self.locks.get_lock(&path_key(user.as_str(), &rel));
        let _guard = lock.lock();

        check_expected(&full, &rel, expect)?;
        let meta = fs::symlink_metadata(&full).map_err(|e| StoreError::from_io(e, &rel))?;
        // Dangling symlinks cannot be described, only removed.
        let described =
            describe_entry(&full, &rel).unwrap_or_else(|_| FileMetadata::removed(&rel, meta.is_dir()));
        if meta.is_dir() {
            fs::remove_dir(&full).map_err(|e| StoreError::from_io(e, &rel))?;
        } else {
            fs::remove_file(&full).map_err(|e| StoreError::from_io(e, &rel))?;
        }
        debug!(user = %user, path = %rel, "Deleted entry");
        Ok(described)
    }

    /// Rename `old` to `new`, creating the destination's parents.
    pub fn move_entry(&self, user: &UserId, old: &str, new: &str) -> Result<(), StoreError> {
        self.move_if(user, old, new, Expect::Any, Expect::Any)
    }

    /// Rename `old` to `new` if both are still in their expected states while
    /// both locks are held.
    pub fn move_if(
        &self,
        user: &UserId,
        old: &str,
        new: &str,
        expect_old: Expect<'_>,
        expect_new: Expect<'_>,
    ) -> Result<(), StoreError> {
        let old_rel = validate(old)?;
        let new_rel = validate(new)?;
        if new_rel == old_rel {
            return Ok(());
        }
        if new_rel.starts_with(&format!("{old_rel}/")) {
            return Err(StoreError::Validation(format!(
                "cannot move {old_rel} into itself"
            )));
        }

        let old_key = path_key(user.as_str(), &old_rel);
        let new_key = path_key(user.as_str(), &new_rel);
        let locks = self.locks.get_locks(&[old_key.as_str(), new_key.as_str()]);
        let _guards: Vec<_> = locks.iter().map(|l| l.lock()).collect();

        let old_full = self.full_path(user, &old_rel);
        let new_full = self.full_path(user, &new_rel);
        check_expected(&old_full, &old_rel, expect_old)?;
        check_expected(&new_full, &new_rel, expect_new)?;
        fs::symlink_metadata(&old_full).map_err(|e| StoreError::from_io(e, &old_rel))?;
        if let Some(parent) = new_full.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&old_full, &new_full).map_err(|e| StoreError::from_io(e, &old_rel))?;
        debug!(user = %user, from = %old_rel, to = %new_rel, "Moved entry");
        Ok(())
    }

    pub fn exists(&self, user: &UserId, path: &str) -> Result<bool, StoreError> {
        let rel = validate(path)?;
        Ok(self.full_path(user, &rel).exists())
    }

    /// Stat and hash a single entry.
    pub fn get_info(&self, user: &UserId, path: &str) -> Result<FileMetadata, StoreError> {
        let rel = validate(path)?;
        let full = self.full_path(user, &rel);
        describe_entry(&full, &rel).map_err(|e| StoreError::from_io(e, &rel))
    }

    /// `mkdir -p` a directory inside the namespace.
    pub fn create_dir(&self, user: &UserId, path: &str) -> Result<FileMetadata, StoreError> {
        let rel = validate(path)?;
        let full = self.full_path(user, &rel);
        let lock = self.locks.get_lock(&path_key(user.as_str(), &rel));
        let _guard = lock.lock();

        fs::create_dir_all(&full)?;
        debug!(user = %user, path = %rel, "Created directory");
        describe_entry(&full, &rel).map_err(|e| StoreError::from_io(e, &rel))
    }

    /// Immediate children of `dir`, sorted by path. Entries whose metadata
    /// cannot be read are skipped.
    pub fn list(&self, user: &UserId, dir: &str) -> Result<Vec<FileMetadata>, StoreError> {
        let rel_dir = validate_dir(dir)?;
        if rel_dir.is_empty() {
            self.ensure_namespace(user)?;
        }
        let full = self.full_path(user, &rel_dir);
        let meta = fs::metadata(&full).map_err(|e| StoreError::from_io(e, &rel_dir))?;
        if !meta.is_dir() {
            return Err(StoreError::Validation(format!("{rel_dir} is not a directory")));
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&full).map_err(|e| StoreError::from_io(e, &rel_dir))? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(user = %user, dir = %rel_dir, error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                warn!(user = %user, dir = %rel_dir, "Skipping entry with non UTF-8 name");
                continue;
            };
            let rel = if rel_dir.is_empty() {
                name.to_string()
            } else {
                format!("{rel_dir}/{name}")
            };
            if is_excluded(&rel) {
                continue;
            }
            match describe_entry(&entry.path(), &rel) {
                Ok(meta) => entries.push(meta),
                Err(e) => warn!(user = %user, path = %rel, error = %e, "Skipping entry with unreadable metadata"),
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(user = %user, dir = %rel_dir, count = entries.len(), "Listed directory");
        Ok(entries)
    }

    /// Recursive listing of the whole namespace.
    pub fn walk(&self, user: &UserId) -> Result<Vec<FileMetadata>, StoreError> {
        let root = self.ensure_namespace(user)?;
        Ok(walk(&root))
    }
}

/// State a path must be in for a conditional mutation to go ahead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect<'a> {
    /// No precondition.
    Any,
    /// Nothing exists at the path.
    Absent,
    /// A regular file whose SHA-256 hex digest is this value.
    Hash(&'a str),
}

impl<'a> Expect<'a> {
    /// `Hash` for a known digest, `Absent` otherwise.
    pub fn from_hash(hash: Option<&'a str>) -> Self {
        hash.map_or(Expect::Absent, Expect::Hash)
    }
}

/// Compare the entry at `full` against `expect`. Call with the path's lock held.
fn check_expected(full: &Path, rel: &str, expect: Expect<'_>) -> Result<(), StoreError> {
    let modified = || StoreError::Modified(rel.to_string());
    match expect {
        Expect::Any => Ok(()),
        Expect::Absent => match fs::symlink_metadata(full) {
            Ok(_) => Err(modified()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        },
        Expect::Hash(expected) => {
            let meta = match fs::metadata(full) {
                Ok(meta) => meta,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(modified()),
                Err(e) => return Err(StoreError::Io(e)),
            };
            if meta.is_dir() {
                return Err(modified());
            }
            let current = hash_file(full)?;
            if current.eq_ignore_ascii_case(expected.trim()) {
                Ok(())
            } else {
                Err(modified())
            }
        }
    }
}

/// Write `content` to a temp file in `dir` and rename it over `target`.
fn write_atomic(dir: &Path, target: &Path, content: &[u8]) -> Result<(), StoreError> {
    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_FILE_PREFIX)
        .tempfile_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o644))?;
    }

    tmp.persist(target).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}
