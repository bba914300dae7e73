//! File service
//!
//! The operations an HTTP layer binds to, composed from the content store,
//! the change broadcaster and the sync engine. Store I/O is blocking and runs
//! on tokio's blocking pool. Every successful mutation is broadcast to the
//! user's live connections.

use crate::broadcast::ChangeBroadcaster;
use crate::error::{ApiError, StoreError};
use crate::path::file_name;
use crate::store::ContentStore;
use crate::sync::{run_diff, run_sync, DiffRequest, DiffResponse, SyncRequest, SyncResponse};
use crate::tree::{build_tree, group_by_directory, TreeNode};
use crate::types::{ChangeType, FileChange, FileMetadata, UserId};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A downloaded file with its presentation details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub content: Vec<u8>,
    pub content_type: &'static str,
    pub file_name: String,
}

/// Content type served for a file name (extension compared case-insensitively).
pub fn content_type_for(name: &str) -> &'static str {
    let ext = match name.rfind('.') {
        Some(idx) => name[idx + 1..].to_ascii_lowercase(),
        None => String::new(),
    };
    match ext.as_str() {
        "txt" | "md" => "text/plain",
        "json" => "application/json",
        "html" => "text/html",
        _ => "application/octet-stream",
    }
}

#[derive(Clone)]
pub struct FileService {
    store: Arc<ContentStore>,
    broadcaster: Arc<ChangeBroadcaster>,
}

impl FileService {
    pub fn new(store: Arc<ContentStore>, broadcaster: Arc<ChangeBroadcaster>) -> Self {
        Self { store, broadcaster }
    }

    pub fn store(&self) -> &Arc<ContentStore> {
        &self.store
    }

    pub fn broadcaster(&self) -> &Arc<ChangeBroadcaster> {
        &self.broadcaster
    }

    async fn blocking<T, E, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&ContentStore) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Into<ApiError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(&store))
            .await?
            .map_err(Into::into)
    }

    async fn notify(&self, user: &UserId, kind: ChangeType, file: FileMetadata) {
        self.broadcaster
            .broadcast(user, FileChange::new(kind, file))
            .await;
    }

    /// Immediate children of `dir`.
    pub async fn list(&self, user: &UserId, dir: &str) -> Result<Vec<FileMetadata>, ApiError> {
        let (user, dir) = (user.clone(), dir.to_string());
        self.blocking(move |store| store.list(&user, &dir)).await
    }

    /// Whole namespace as a nested tree.
    pub async fn tree(&self, user: &UserId) -> Result<Vec<TreeNode>, ApiError> {
        let user = user.clone();
        let entries = self.blocking(move |store| store.walk(&user)).await?;
        Ok(build_tree(&entries))
    }

    /// Whole namespace grouped by parent directory.
    pub async fn list_grouped(
        &self,
        user: &UserId,
    ) -> Result<BTreeMap<String, Vec<FileMetadata>>, ApiError> {
        let user = user.clone();
        let entries = self.blocking(move |store| store.walk(&user)).await?;
        Ok(group_by_directory(&entries))
    }

    /// Create or replace a file.
    pub async fn upload(
        &self,
        user: &UserId,
        path: &str,
        content: Vec<u8>,
    ) -> Result<FileMetadata, ApiError> {
        let (owner, path) = (user.clone(), path.to_string());
        let (kind, meta) = self
            .blocking(move |store| store.upsert(&owner, &path, &content))
            .await?;
        self.notify(user, kind, meta.clone()).await;
        Ok(meta)
    }

    pub async fn download(&self, user: &UserId, path: &str) -> Result<Download, ApiError> {
        let (owner, rel) = (user.clone(), path.to_string());
        let content = self.blocking(move |store| store.get(&owner, &rel)).await?;
        let name = file_name(path.trim_end_matches('/')).to_string();
        Ok(Download {
            content,
            content_type: content_type_for(&name),
            file_name: name,
        })
    }

    pub async fn delete(&self, user: &UserId, path: &str) -> Result<(), ApiError> {
        let (owner, path) = (user.clone(), path.to_string());
        let meta = self
            .blocking(move |store| -> Result<FileMetadata, StoreError> {
                let meta = store.get_info(&owner, &path)?;
                store.delete(&owner, &path)?;
                Ok(meta)
            })
            .await?;
        self.notify(user, ChangeType::Delete, meta).await;
        Ok(())
    }

    pub async fn info(&self, user: &UserId, path: &str) -> Result<FileMetadata, ApiError> {
        let (user, path) = (user.clone(), path.to_string());
        self.blocking(move |store| store.get_info(&user, &path)).await
    }

    pub async fn create_dir(&self, user: &UserId, path: &str) -> Result<FileMetadata, ApiError> {
        let (owner, path) = (user.clone(), path.to_string());
        let meta = self
            .blocking(move |store| store.create_dir(&owner, &path))
            .await?;
        self.notify(user, ChangeType::Create, meta.clone()).await;
        Ok(meta)
    }

    /// Rename an entry. Subscribers see a delete of the old path followed by
    /// a create of the new one.
    pub async fn move_entry(
        &self,
        user: &UserId,
        old: &str,
        new: &str,
    ) -> Result<FileMetadata, ApiError> {
        let (owner, old, new) = (user.clone(), old.to_string(), new.to_string());
        let (old_meta, new_meta) = self
            .blocking(move |store| -> Result<_, StoreError> {
                let old_meta = store.get_info(&owner, &old)?;
                store.move_entry(&owner, &old, &new)?;
                let new_meta = store.get_info(&owner, &new)?;
                Ok((old_meta, new_meta))
            })
            .await?;
        if old_meta.path != new_meta.path {
            self.notify(user, ChangeType::Delete, old_meta).await;
            self.notify(user, ChangeType::Create, new_meta.clone()).await;
        }
        Ok(new_meta)
    }

    /// Run a sync round and broadcast whatever it changed on the server.
    pub async fn sync(
        &self,
        user: &UserId,
        request: SyncRequest,
    ) -> Result<SyncResponse, ApiError> {
        let owner = user.clone();
        let outcome = self
            .blocking(move |store| run_sync(store, &owner, &request))
            .await?;
        for change in outcome.changes {
            self.broadcaster.broadcast(user, change).await;
        }
        Ok(outcome.response)
    }

    pub async fn diff(&self, user: &UserId, request: DiffRequest) -> Result<DiffResponse, ApiError> {
        let user = user.clone();
        self.blocking(move |store| run_diff(store, &user, &request))
            .await
    }
}
