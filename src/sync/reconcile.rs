//! Three-way reconciliation
//!
//! For each file path, compare the client's base (its last synced checkpoint),
//! the hash the client's local changes leave behind, and the current server
//! hash. Planning is pure; applying the plan is the engine's job.

use crate::sync::protocol::{
    ConflictReport, FileOperation, RejectedChange, SyncMessage, SyncState,
};
use crate::types::FileMetadata;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStatus {
    /// Both sides agree; nothing to send or apply.
    Unchanged,
    /// Only the server moved away from the base.
    ServerChanged,
    /// Only the client moved away from the base.
    ClientChanged,
    /// Both moved, to different results.
    Conflict,
}

/// A server-side change the client has to pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAction {
    pub path: String,
    pub operation: FileOperation,
    /// Current server hash (`None` for deletes).
    pub hash: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    pub statuses: BTreeMap<String, PathStatus>,
    /// Validated, normalized client changes safe to apply, in request order.
    pub client_actions: Vec<SyncMessage>,
    pub server_actions: Vec<ServerAction>,
    pub conflicts: Vec<ConflictReport>,
    pub rejected: Vec<RejectedChange>,
}

impl SyncPlan {
    pub fn conflict_paths(&self) -> BTreeSet<String> {
        self.conflicts.iter().map(|c| c.path.clone()).collect()
    }
}

type HashMapping = BTreeMap<String, Option<String>>;

/// File hashes by path; directories are not reconciled.
fn file_hashes<'a>(entries: impl Iterator<Item = &'a FileMetadata>) -> HashMapping {
    entries
        .filter(|meta| !meta.is_dir)
        .map(|meta| {
            (
                crate::path::normalize(&meta.path),
                meta.hash.as_ref().map(|h| h.to_ascii_lowercase()),
            )
        })
        .collect()
}

/// An accepted change and the hash it leaves at each path it touches.
struct Touch {
    message: SyncMessage,
    results: Vec<(String, Option<String>)>,
}

fn lookup(map: &HashMapping, path: &str) -> Option<String> {
    map.get(path).cloned().flatten()
}

pub fn plan(state: &SyncState, changes: &[SyncMessage], server: &[FileMetadata]) -> SyncPlan {
    let base = file_hashes(state.files.values());
    let server = file_hashes(server.iter());
    let mut plan = SyncPlan::default();

    // Accept or reject each change on its own.
    let mut touched: BTreeSet<String> = BTreeSet::new();
    let mut touches: Vec<Touch> = Vec::new();
    for change in changes {
        let mut message = change.clone();
        if let Err(e) = message.validate() {
            plan.rejected.push(RejectedChange {
                path: change.path.clone(),
                reason: e.to_string(),
            });
            continue;
        }

        let results = match (message.operation, message.new_path.clone()) {
            (FileOperation::Rename, Some(new_path)) => {
                if !base.contains_key(&message.path) {
                    plan.rejected.push(RejectedChange {
                        path: message.path.clone(),
                        reason: "rename source is not in the synced state".to_string(),
                    });
                    continue;
                }
                vec![
                    (message.path.clone(), None),
                    (new_path, lookup(&base, &message.path)),
                ]
            }
            _ => {
                if let Some(patch) = &message.patch {
                    let base_hash = lookup(&base, &message.path);
                    if base_hash.as_deref() != Some(patch.base_hash.to_ascii_lowercase().as_str()) {
                        plan.rejected.push(RejectedChange {
                            path: message.path.clone(),
                            reason: "patch base does not match the synced version".to_string(),
                        });
                        continue;
                    }
                }
                vec![(message.path.clone(), message.result_hash())]
            }
        };

        if let Some((dup, _)) = results.iter().find(|(p, _)| touched.contains(p)) {
            plan.rejected.push(RejectedChange {
                path: dup.clone(),
                reason: "path changed more than once in one request".to_string(),
            });
            continue;
        }
        touched.extend(results.iter().map(|(p, _)| p.clone()));
        touches.push(Touch { message, results });
    }

    // Classify client-touched paths.
    for touch in touches {
        let is_rename = touch.message.operation == FileOperation::Rename;
        let mut statuses = Vec::with_capacity(touch.results.len());
        for (idx, (path, result)) in touch.results.iter().enumerate() {
            let b = lookup(&base, path);
            let s = lookup(&server, path);
            let is_destination = is_rename && idx == 1;
            let status = if is_destination && b.is_none() && s.is_some() {
                PathStatus::Conflict
            } else if *result == s {
                PathStatus::Unchanged
            } else if s == b {
                PathStatus::ClientChanged
            } else {
                PathStatus::Conflict
            };
            statuses.push((path.clone(), result.clone(), b, s, status));
        }

        let any_conflict = statuses.iter().any(|st| st.4 == PathStatus::Conflict);
        if is_rename && !any_conflict && statuses[0].4 != PathStatus::ClientChanged {
            // Source already gone on the server; nothing to move.
            touched.remove(&statuses[0].0);
            touched.remove(&statuses[1].0);
            plan.rejected.push(RejectedChange {
                path: touch.message.path.clone(),
                reason: "rename source no longer exists on the server".to_string(),
            });
            continue;
        }

        for (path, result, b, s, status) in statuses {
            let status = if any_conflict { PathStatus::Conflict } else { status };
            if status == PathStatus::Conflict {
                plan.conflicts.push(ConflictReport {
                    path: path.clone(),
                    base_hash: b,
                    client_hash: result,
                    server_hash: s,
                });
            }
            plan.statuses.insert(path, status);
        }

        let applies = if is_rename {
            !any_conflict
        } else {
            plan.statuses.get(&touch.message.path) == Some(&PathStatus::ClientChanged)
        };
        if applies {
            plan.client_actions.push(touch.message);
        }
    }

    // Everything else is decided by the server alone.
    let all_paths: BTreeSet<&String> = base.keys().chain(server.keys()).collect();
    for path in all_paths {
        if touched.contains(path.as_str()) {
            continue;
        }
        let b = lookup(&base, path);
        let s = lookup(&server, path);
        let in_base = base.contains_key(path.as_str());
        let on_server = server.contains_key(path.as_str());

        let status = if s == b && in_base == on_server {
            PathStatus::Unchanged
        } else if state.conflicts.contains(path.as_str()) {
            PathStatus::Conflict
        } else {
            PathStatus::ServerChanged
        };

        match status {
            PathStatus::Conflict => plan.conflicts.push(ConflictReport {
                path: path.clone(),
                base_hash: b,
                client_hash: None,
                server_hash: s,
            }),
            PathStatus::ServerChanged => {
                let operation = if !in_base {
                    FileOperation::Create
                } else if !on_server {
                    FileOperation::Delete
                } else {
                    FileOperation::Update
                };
                plan.server_actions.push(ServerAction {
                    path: path.clone(),
                    operation,
                    hash: s,
                });
            }
            _ => {}
        }
        plan.statuses.insert(path.clone(), status);
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use crate::sync::diff::generate_diff;
    use chrono::Utc;

    fn file(path: &str, content: &[u8]) -> FileMetadata {
        FileMetadata {
            name: crate::path::file_name(path).to_string(),
            path: path.to_string(),
            size: content.len() as i64,
            is_dir: false,
            mod_time: Utc::now(),
            hash: Some(hash_bytes(content)),
        }
    }

    fn state(files: &[FileMetadata]) -> SyncState {
        SyncState {
            files: files.iter().map(|f| (f.path.clone(), f.clone())).collect(),
            ..SyncState::default()
        }
    }

    #[test]
    fn unchanged_on_both_sides_sends_nothing() {
        let a = file("a.txt", b"a");
        let plan = plan(&state(&[a.clone()]), &[], &[a]);
        assert_eq!(plan.statuses["a.txt"], PathStatus::Unchanged);
        assert!(plan.server_actions.is_empty());
        assert!(plan.client_actions.is_empty());
        assert!(plan.conflicts.is_empty());
    }

    #[test]
    fn server_changes_become_actions() {
        let base = state(&[file("upd.txt", b"1"), file("del.txt", b"d")]);
        let server = vec![file("upd.txt", b"2"), file("new.txt", b"n")];
        let plan = plan(&base, &[], &server);

        let ops: Vec<_> = plan
            .server_actions
            .iter()
            .map(|a| (a.path.as_str(), a.operation))
            .collect();
        assert_eq!(
            ops,
            vec![
                ("del.txt", FileOperation::Delete),
                ("new.txt", FileOperation::Create),
                ("upd.txt", FileOperation::Update),
            ]
        );
    }

    #[test]
    fn client_change_on_unchanged_server_is_applied() {
        let a = file("a.txt", b"a");
        let change = SyncMessage::update("a.txt", b"b".to_vec());
        let plan = plan(&state(&[a.clone()]), &[change], &[a]);
        assert_eq!(plan.statuses["a.txt"], PathStatus::ClientChanged);
        assert_eq!(plan.client_actions.len(), 1);
    }

    #[test]
    fn divergent_changes_conflict() {
        let base = state(&[file("a.txt", b"base")]);
        let server = vec![file("a.txt", b"server")];
        let change = SyncMessage::update("a.txt", b"client".to_vec());
        let plan = plan(&base, &[change], &server);

        assert_eq!(plan.statuses["a.txt"], PathStatus::Conflict);
        assert!(plan.client_actions.is_empty());
        let report = &plan.conflicts[0];
        assert_eq!(report.base_hash, Some(hash_bytes(b"base")));
        assert_eq!(report.client_hash, Some(hash_bytes(b"client")));
        assert_eq!(report.server_hash, Some(hash_bytes(b"server")));
    }

    #[test]
    fn identical_results_are_unchanged() {
        let base = state(&[file("a.txt", b"base")]);
        let server = vec![file("a.txt", b"same")];
        let change = SyncMessage::update("a.txt", b"same".to_vec());
        let plan = plan(&base, &[change], &server);
        assert_eq!(plan.statuses["a.txt"], PathStatus::Unchanged);
        assert!(plan.conflicts.is_empty());
        assert!(plan.client_actions.is_empty());
    }

    #[test]
    fn rename_onto_server_created_path_conflicts_both_paths() {
        let base = state(&[file("a.txt", b"a")]);
        let server = vec![file("a.txt", b"a"), file("b.txt", b"other")];
        let plan = plan(&base, &[SyncMessage::rename("a.txt", "b.txt")], &server);
        assert_eq!(plan.statuses["a.txt"], PathStatus::Conflict);
        assert_eq!(plan.statuses["b.txt"], PathStatus::Conflict);
        assert!(plan.client_actions.is_empty());
    }

    #[test]
    fn rename_of_unchanged_file_applies() {
        let a = file("a.txt", b"a");
        let plan = plan(&state(&[a.clone()]), &[SyncMessage::rename("a.txt", "b.txt")], &[a]);
        assert_eq!(plan.statuses["a.txt"], PathStatus::ClientChanged);
        assert_eq!(plan.statuses["b.txt"], PathStatus::ClientChanged);
        assert_eq!(plan.client_actions.len(), 1);
    }

    #[test]
    fn rejects_bad_hash_and_duplicates() {
        let mut bad = SyncMessage::create("x.txt", b"x".to_vec());
        bad.hash = Some(hash_bytes(b"y"));
        let first = SyncMessage::create("y.txt", b"1".to_vec());
        let second = SyncMessage::update("y.txt", b"2".to_vec());
        let plan = plan(&SyncState::default(), &[bad, first, second], &[]);

        let rejected: Vec<_> = plan.rejected.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(rejected, vec!["x.txt", "y.txt"]);
        assert_eq!(plan.client_actions.len(), 1);
    }

    #[test]
    fn patch_against_wrong_base_is_rejected() {
        let base = state(&[file("a.txt", b"one\n")]);
        let patch = generate_diff(b"zero\n", b"two\n");
        let change = SyncMessage::update_with_patch("a.txt", patch);
        let plan = plan(&base, &[change], &[file("a.txt", b"one\n")]);
        assert_eq!(plan.rejected.len(), 1);
        assert_eq!(plan.statuses["a.txt"], PathStatus::Unchanged);
    }

    #[test]
    fn prior_conflict_persists_until_resolved() {
        let mut base = state(&[file("a.txt", b"base")]);
        base.conflicts.insert("a.txt".to_string());
        let server = vec![file("a.txt", b"server")];

        let still = plan(&base, &[], &server);
        assert_eq!(still.statuses["a.txt"], PathStatus::Conflict);
        assert!(still.server_actions.is_empty());

        // Client rebased onto the server version and resubmitted.
        let mut rebased = state(&[file("a.txt", b"server")]);
        rebased.conflicts.insert("a.txt".to_string());
        let change = SyncMessage::update("a.txt", b"merged".to_vec());
        let resolved = plan(&rebased, &[change], &server);
        assert_eq!(resolved.statuses["a.txt"], PathStatus::ClientChanged);
        assert!(resolved.conflicts.is_empty());
    }
}
