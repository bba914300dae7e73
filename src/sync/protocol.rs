//! Sync wire types

use crate::error::SyncError;
use crate::hash::{self, is_well_formed};
use crate::path;
use crate::sync::diff::Patch;
use crate::types::FileMetadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub fn generate_hash(content: &[u8]) -> String {
    hash::hash_bytes(content)
}

pub fn validate_hash(content: &[u8], hash: &str) -> bool {
    hash::validate_hash(content, hash)
}

/// Serde adapter: raw bytes as standard base64 strings.
pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(D::Error::custom)
    }
}

/// Serde adapter: optional raw bytes as standard base64 strings.
pub(crate) mod base64_opt {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|encoded| STANDARD.decode(encoded.as_bytes()))
            .transpose()
            .map_err(D::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOperation {
    Create,
    Update,
    Delete,
    Rename,
}

/// One file mutation, in either direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMessage {
    pub operation: FileOperation,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_opt")]
    pub content: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<Patch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl SyncMessage {
    fn base(operation: FileOperation, path: impl Into<String>) -> Self {
        Self {
            operation,
            path: path.into(),
            new_path: None,
            content: None,
            patch: None,
            hash: None,
            timestamp: Utc::now(),
        }
    }

    pub fn create(path: impl Into<String>, content: Vec<u8>) -> Self {
        let mut msg = Self::base(FileOperation::Create, path);
        msg.hash = Some(generate_hash(&content));
        msg.content = Some(content);
        msg
    }

    pub fn update(path: impl Into<String>, content: Vec<u8>) -> Self {
        let mut msg = Self::base(FileOperation::Update, path);
        msg.hash = Some(generate_hash(&content));
        msg.content = Some(content);
        msg
    }

    pub fn update_with_patch(path: impl Into<String>, patch: Patch) -> Self {
        let mut msg = Self::base(FileOperation::Update, path);
        msg.hash = Some(patch.target_hash.clone());
        msg.patch = Some(patch);
        msg
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::base(FileOperation::Delete, path)
    }

    pub fn rename(path: impl Into<String>, new_path: impl Into<String>) -> Self {
        let mut msg = Self::base(FileOperation::Rename, path);
        msg.new_path = Some(new_path.into());
        msg
    }

    /// Hash of the content this message leaves at `path` (or `new_path` for
    /// a rename, which keeps whatever `path` held). `None` for deletes.
    pub fn result_hash(&self) -> Option<String> {
        match self.operation {
            FileOperation::Delete | FileOperation::Rename => None,
            FileOperation::Create | FileOperation::Update => {
                match (&self.content, &self.patch) {
                    (Some(content), _) => Some(generate_hash(content)),
                    (None, Some(patch)) => Some(patch.target_hash.to_ascii_lowercase()),
                    (None, None) => self.hash.as_ref().map(|h| h.to_ascii_lowercase()),
                }
            }
        }
    }

    /// Structural checks plus content integrity. Paths are normalized in
    /// place.
    pub fn validate(&mut self) -> Result<(), SyncError> {
        self.path = path::validate(&self.path).map_err(|e| SyncError::Validation(e.to_string()))?;

        match (self.operation, self.new_path.take()) {
            (FileOperation::Rename, Some(new_path)) => {
                let normalized =
                    path::validate(&new_path).map_err(|e| SyncError::Validation(e.to_string()))?;
                if normalized == self.path {
                    return Err(SyncError::Validation(format!(
                        "rename of {} onto itself",
                        self.path
                    )));
                }
                self.new_path = Some(normalized);
            }
            (FileOperation::Rename, None) => {
                return Err(SyncError::Validation("rename without new_path".to_string()));
            }
            (_, Some(_)) => {
                return Err(SyncError::Validation(
                    "new_path is only valid for rename".to_string(),
                ));
            }
            (_, None) => {}
        }

        if let Some(hash) = &self.hash {
            if !is_well_formed(hash) {
                return Err(SyncError::Validation(format!("malformed hash {hash:?}")));
            }
        }

        match self.operation {
            FileOperation::Create => {
                if self.content.is_none() || self.patch.is_some() {
                    return Err(SyncError::Validation(
                        "create must carry content and no patch".to_string(),
                    ));
                }
            }
            FileOperation::Update => {
                if self.content.is_some() == self.patch.is_some() {
                    return Err(SyncError::Validation(
                        "update must carry exactly one of content or patch".to_string(),
                    ));
                }
            }
            FileOperation::Delete | FileOperation::Rename => {
                if self.content.is_some() || self.patch.is_some() {
                    return Err(SyncError::Validation(format!(
                        "{:?} must not carry content",
                        self.operation
                    )));
                }
            }
        }

        if let (Some(content), Some(hash)) = (&self.content, &self.hash) {
            if !validate_hash(content, hash) {
                return Err(SyncError::Validation(format!(
                    "hash does not match content for {}",
                    self.path
                )));
            }
        }
        if let (Some(patch), Some(hash)) = (&self.patch, &self.hash) {
            if !patch.target_hash.eq_ignore_ascii_case(hash) {
                return Err(SyncError::Validation(format!(
                    "hash does not match patch target for {}",
                    self.path
                )));
            }
        }
        Ok(())
    }
}

/// Per-client checkpoint: the last version both sides agreed on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncState {
    pub last_sync: DateTime<Utc>,
    pub files: BTreeMap<String, FileMetadata>,
    pub conflicts: BTreeSet<String>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            last_sync: DateTime::<Utc>::from(std::time::UNIX_EPOCH),
            files: BTreeMap::new(),
            conflicts: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    #[serde(default)]
    pub state: SyncState,
    /// Local mutations since `state.last_sync`.
    #[serde(default, alias = "files")]
    pub changes: Vec<SyncMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub path: String,
    pub base_hash: Option<String>,
    pub client_hash: Option<String>,
    pub server_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedChange {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Server-side changes the client must apply.
    #[serde(default)]
    pub updates: Vec<SyncMessage>,
    /// Paths of client changes the server applied.
    #[serde(default)]
    pub applied: Vec<String>,
    #[serde(default)]
    pub conflicts: Vec<ConflictReport>,
    #[serde(default)]
    pub rejected: Vec<RejectedChange>,
    pub state: SyncState,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffRequest {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Hash of the client's current copy.
    pub hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResponse {
    pub has_changes: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<Patch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::diff::generate_diff;

    #[test]
    fn content_travels_as_base64() {
        let msg = SyncMessage::create("a.txt", b"hi".to_vec());
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["operation"], "create");
        assert_eq!(json["content"], "aGk=");
        assert!(json.get("new_path").is_none());

        let back: SyncMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back.content.as_deref(), Some(&b"hi"[..]));
    }

    #[test]
    fn request_accepts_legacy_files_key() {
        let json = serde_json::json!({
            "files": [{"operation": "delete", "path": "x.txt", "timestamp": "2024-01-01T00:00:00Z"}]
        });
        let req: SyncRequest = serde_json::from_value(json).unwrap();
        assert_eq!(req.changes.len(), 1);
        assert!(req.state.files.is_empty());
    }

    #[test]
    fn validate_normalizes_and_checks_shape() {
        let mut msg = SyncMessage::rename("./a//b.txt", "c.txt");
        msg.validate().unwrap();
        assert_eq!(msg.path, "a/b.txt");

        let mut msg = SyncMessage::rename("a.txt", "../c.txt");
        assert!(msg.validate().is_err());

        let mut msg = SyncMessage::delete("a.txt");
        msg.content = Some(b"x".to_vec());
        assert!(msg.validate().is_err());

        let mut msg = SyncMessage::update("a.txt", b"x".to_vec());
        msg.patch = Some(generate_diff(b"", b"x"));
        assert!(msg.validate().is_err());
    }

    #[test]
    fn validate_rejects_hash_mismatch() {
        let mut msg = SyncMessage::update("a.txt", b"new".to_vec());
        msg.hash = Some(generate_hash(b"old"));
        assert!(matches!(msg.validate(), Err(SyncError::Validation(_))));

        let mut msg = SyncMessage::update("a.txt", b"new".to_vec());
        msg.hash = Some(generate_hash(b"new").to_uppercase());
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn result_hash_per_operation() {
        assert_eq!(
            SyncMessage::create("a", b"x".to_vec()).result_hash(),
            Some(generate_hash(b"x"))
        );
        let patch = generate_diff(b"a\n", b"b\n");
        assert_eq!(
            SyncMessage::update_with_patch("a", patch).result_hash(),
            Some(generate_hash(b"b\n"))
        );
        assert_eq!(SyncMessage::delete("a").result_hash(), None);
    }
}
