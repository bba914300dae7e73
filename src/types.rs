//! Core types shared by the store, tree builder, broadcaster and sync engine.

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a namespace owner, as resolved by the outer auth layer.
///
/// A user id names exactly one directory under the storage base, so it must
/// be a single plain path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Result<Self, StoreError> {
        let id = id.into();
        if id.is_empty() {
            return Err(StoreError::Validation("user id is empty".to_string()));
        }
        if id == "." || id == ".." || id.starts_with('.') {
            return Err(StoreError::Validation(format!("invalid user id: {id}")));
        }
        if id.contains(['/', '\\', '\0']) || id.contains(':') {
            return Err(StoreError::Validation(format!("invalid user id: {id}")));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UserId {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

/// Metadata for one entry of a user namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    /// User-relative, normalized, forward-slash path.
    pub path: String,
    pub size: i64,
    #[serde(rename = "isDir")]
    pub is_dir: bool,
    #[serde(rename = "modTime")]
    pub mod_time: DateTime<Utc>,
    /// Lowercase hex SHA-256 of the content. Present iff `is_dir` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl FileMetadata {
    /// Metadata for an entry that cannot be stat'ed, such as a dangling
    /// symlink being deleted: zero size, no hash, stamped now.
    pub fn removed(path: &str, is_dir: bool) -> Self {
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        Self {
            name,
            path: path.to_string(),
            size: 0,
            is_dir,
            mod_time: Utc::now(),
            hash: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeType::Create => "create",
            ChangeType::Update => "update",
            ChangeType::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// A single mutation event pushed to notification subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    #[serde(rename = "type")]
    pub kind: ChangeType,
    pub file: FileMetadata,
}

impl FileChange {
    pub fn new(kind: ChangeType, file: FileMetadata) -> Self {
        Self { kind, file }
    }
}
