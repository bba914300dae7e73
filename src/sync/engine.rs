//! Applying a reconciliation plan to a user namespace
//!
//! The plan is computed from a single walk of the namespace. Every client
//! change is then applied with a store precondition that the path still
//! holds what that walk saw, so a write landing in between turns into a
//! conflict instead of being overwritten. The returned checkpoint is derived
//! from the same walk plus the applied changes, never from a second walk.

use crate::error::{StoreError, SyncError};
use crate::hash::hash_bytes;
use crate::store::{ContentStore, Expect};
use crate::sync::diff::{apply_diff, Patch};
use crate::sync::protocol::{
    ConflictReport, DiffRequest, DiffResponse, FileOperation, RejectedChange, SyncMessage,
    SyncRequest, SyncResponse, SyncState,
};
use crate::sync::reconcile::{plan, SyncPlan};
use crate::types::{ChangeType, FileChange, FileMetadata, UserId};
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Result of a sync round: the reply for the client and the store mutations
/// that other connections should hear about.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub response: SyncResponse,
    pub changes: Vec<FileChange>,
}

type FileIndex = BTreeMap<String, FileMetadata>;

/// Reconcile the client's checkpoint and local changes with the namespace.
pub fn run_sync(
    store: &ContentStore,
    user: &UserId,
    request: &SyncRequest,
) -> Result<SyncOutcome, SyncError> {
    let server_before = store.walk(user)?;
    let plan = plan(&request.state, &request.changes, &server_before);
    Ok(apply_plan(store, user, &request.state, plan, &server_before))
}

fn apply_plan(
    store: &ContentStore,
    user: &UserId,
    base: &SyncState,
    plan: SyncPlan,
    server_before: &[FileMetadata],
) -> SyncOutcome {
    let mut files: FileIndex = server_before
        .iter()
        .filter(|meta| !meta.is_dir)
        .map(|meta| (meta.path.clone(), meta.clone()))
        .collect();

    let mut conflicts = plan.conflicts;
    let mut rejected = plan.rejected;
    let mut applied = Vec::new();
    let mut changes = Vec::new();

    for action in &plan.client_actions {
        match apply_client_change(store, user, action, &files) {
            Ok(emitted) => {
                applied.push(action.path.clone());
                for change in &emitted {
                    match change.kind {
                        ChangeType::Delete => {
                            files.remove(&change.file.path);
                        }
                        _ if !change.file.is_dir => {
                            files.insert(change.file.path.clone(), change.file.clone());
                        }
                        _ => {}
                    }
                }
                changes.extend(emitted);
            }
            Err(SyncError::Conflict { path }) => {
                warn!(user = %user, path = %path, "Path changed while syncing");
                let mut paths = vec![action.path.clone()];
                paths.extend(action.new_path.clone());
                for path in paths {
                    let server_hash = store.get_info(user, &path).ok().and_then(|m| m.hash);
                    conflicts.push(ConflictReport {
                        base_hash: base.files.get(&path).and_then(|m| m.hash.clone()),
                        client_hash: action.result_hash(),
                        server_hash,
                        path,
                    });
                }
            }
            Err(e) => {
                warn!(user = %user, path = %action.path, error = %e, "Client change rejected");
                rejected.push(RejectedChange {
                    path: action.path.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    let mut updates = Vec::new();
    for action in &plan.server_actions {
        let message = match action.operation {
            FileOperation::Delete => SyncMessage::delete(action.path.clone()),
            operation => match store.get(user, &action.path) {
                Ok(content) => {
                    // Record what is actually sent, which may be newer than the walk.
                    if let Some(meta) = files.get_mut(&action.path) {
                        meta.size = content.len() as i64;
                        meta.hash = Some(hash_bytes(&content));
                    }
                    if operation == FileOperation::Create {
                        SyncMessage::create(action.path.clone(), content)
                    } else {
                        SyncMessage::update(action.path.clone(), content)
                    }
                }
                Err(e) => {
                    warn!(user = %user, path = %action.path, error = %e, "Skipping server update");
                    restore_base(&mut files, base, &action.path);
                    continue;
                }
            },
        };
        updates.push(message);
    }

    let conflict_paths: std::collections::BTreeSet<String> =
        conflicts.iter().map(|c| c.path.clone()).collect();
    for path in &conflict_paths {
        restore_base(&mut files, base, path);
    }

    let now = Utc::now();
    let success = conflicts.is_empty() && rejected.is_empty();
    let error = (!success).then(|| {
        format!(
            "{} conflict(s), {} rejected change(s)",
            conflicts.len(),
            rejected.len()
        )
    });

    info!(
        user = %user,
        applied = applied.len(),
        updates = updates.len(),
        conflicts = conflicts.len(),
        rejected = rejected.len(),
        "Sync completed"
    );

    SyncOutcome {
        response: SyncResponse {
            success,
            error,
            updates,
            applied,
            conflicts,
            rejected,
            state: SyncState {
                last_sync: now,
                files,
                conflicts: conflict_paths,
            },
            timestamp: now,
        },
        changes,
    }
}

/// Put the client's previous base entry for `path` back into the checkpoint.
fn restore_base(files: &mut FileIndex, base: &SyncState, path: &str) {
    files.remove(path);
    if let Some(prior) = base.files.get(path) {
        files.insert(path.to_string(), prior.clone());
    }
}

/// What the planning walk saw at `path`.
fn seen<'a>(files: &'a FileIndex, path: &str) -> Expect<'a> {
    Expect::from_hash(files.get(path).and_then(|meta| meta.hash.as_deref()))
}

/// Store errors with a failed precondition become conflicts on that path.
fn guarded<T>(result: Result<T, StoreError>) -> Result<T, SyncError> {
    result.map_err(|e| match e {
        StoreError::Modified(path) => SyncError::Conflict { path },
        other => SyncError::Store(other),
    })
}

fn apply_client_change(
    store: &ContentStore,
    user: &UserId,
    message: &SyncMessage,
    files: &FileIndex,
) -> Result<Vec<FileChange>, SyncError> {
    let expect = seen(files, &message.path);
    match message.operation {
        FileOperation::Create | FileOperation::Update => {
            let content = match (&message.content, &message.patch) {
                (Some(content), _) => content.clone(),
                (None, Some(patch)) => patched(store, user, &message.path, patch, expect)?,
                (None, None) => {
                    return Err(SyncError::Validation(format!(
                        "{} carries no content",
                        message.path
                    )));
                }
            };
            let (kind, meta) = guarded(store.upsert_if(user, &message.path, &content, expect))?;
            debug!(user = %user, path = %meta.path, %kind, "Applied client change");
            Ok(vec![FileChange::new(kind, meta)])
        }
        FileOperation::Delete => {
            let meta = guarded(store.delete_if(user, &message.path, expect))?;
            Ok(vec![FileChange::new(ChangeType::Delete, meta)])
        }
        FileOperation::Rename => {
            let new_path = message.new_path.as_deref().ok_or_else(|| {
                SyncError::Validation(format!("rename of {} has no new_path", message.path))
            })?;
            let old_meta = store.get_info(user, &message.path)?;
            guarded(store.move_if(user, &message.path, new_path, expect, seen(files, new_path)))?;
            let new_meta = store.get_info(user, new_path)?;
            Ok(vec![
                FileChange::new(ChangeType::Delete, old_meta),
                FileChange::new(ChangeType::Create, new_meta),
            ])
        }
    }
}

/// Server content for `path` with `patch` applied. Content that no longer
/// matches the planning walk is a conflict, not a bad patch.
fn patched(
    store: &ContentStore,
    user: &UserId,
    path: &str,
    patch: &Patch,
    expect: Expect<'_>,
) -> Result<Vec<u8>, SyncError> {
    let current = match store.get(user, path) {
        Ok(current) => current,
        Err(StoreError::NotFound(_)) => {
            return Err(SyncError::Conflict {
                path: path.to_string(),
            })
        }
        Err(e) => return Err(e.into()),
    };
    if let Expect::Hash(seen) = expect {
        if !hash_bytes(&current).eq_ignore_ascii_case(seen) {
            return Err(SyncError::Conflict {
                path: path.to_string(),
            });
        }
    }
    apply_diff(&current, patch)
}

/// Tell the client whether its copy of a file is current. The server keeps
/// no history, so a stale copy gets a whole-content replacement.
pub fn run_diff(
    store: &ContentStore,
    user: &UserId,
    request: &DiffRequest,
) -> Result<DiffResponse, SyncError> {
    let content = match store.get(user, &request.path) {
        Ok(content) => content,
        Err(StoreError::NotFound(path)) => {
            return Ok(DiffResponse {
                has_changes: true,
                error: Some(format!("{path} not found")),
                ..DiffResponse::default()
            });
        }
        Err(e) => return Err(e.into()),
    };

    let current = hash_bytes(&content);
    if current.eq_ignore_ascii_case(request.hash.trim()) {
        return Ok(DiffResponse {
            has_changes: false,
            new_hash: Some(current),
            ..DiffResponse::default()
        });
    }

    Ok(DiffResponse {
        has_changes: true,
        patch: Some(Patch::replacement(request.hash.trim(), content)),
        new_hash: Some(current),
        error: None,
    })
}
