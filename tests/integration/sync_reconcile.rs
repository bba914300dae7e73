use filesync::sync::{
    run_sync, FileOperation, SyncMessage, SyncRequest, SyncResponse, SyncState,
};
use filesync::{ContentStore, UserId};
use tempfile::TempDir;

fn setup() -> (TempDir, ContentStore, UserId) {
    let temp_dir = TempDir::new().unwrap();
    let store = ContentStore::new(temp_dir.path()).unwrap();
    (temp_dir, store, UserId::new("alice").unwrap())
}

fn sync(store: &ContentStore, user: &UserId, state: SyncState, changes: Vec<SyncMessage>) -> SyncResponse {
    run_sync(store, user, &SyncRequest { state, changes })
        .unwrap()
        .response
}

#[test]
fn edits_flow_between_two_devices() {
    let (_dir, store, user) = setup();

    let laptop = sync(&store, &user, SyncState::default(), vec![
        SyncMessage::create("notes/plan.md", b"draft\n".to_vec()),
    ]);
    assert!(laptop.success);
    assert_eq!(laptop.applied, vec!["notes/plan.md"]);

    let phone = sync(&store, &user, SyncState::default(), vec![]);
    assert!(phone.success);
    assert_eq!(phone.updates.len(), 1);
    assert_eq!(phone.updates[0].operation, FileOperation::Create);
    assert_eq!(phone.updates[0].content.as_deref(), Some(&b"draft\n"[..]));

    let phone = sync(&store, &user, phone.state, vec![
        SyncMessage::update("notes/plan.md", b"final\n".to_vec()),
    ]);
    assert!(phone.success);

    let laptop = sync(&store, &user, laptop.state, vec![]);
    assert_eq!(laptop.updates.len(), 1);
    assert_eq!(laptop.updates[0].operation, FileOperation::Update);
    assert_eq!(laptop.updates[0].content.as_deref(), Some(&b"final\n"[..]));
    assert_eq!(laptop.state.files, phone.state.files);
}

#[test]
fn concurrent_edits_conflict_until_rebased() {
    let (_dir, store, user) = setup();
    store.store(&user, "todo.txt", b"base").unwrap();
    let base = sync(&store, &user, SyncState::default(), vec![]).state;

    store.store(&user, "todo.txt", b"server").unwrap();
    let resp = sync(&store, &user, base.clone(), vec![
        SyncMessage::update("todo.txt", b"client".to_vec()),
    ]);
    assert!(!resp.success);
    assert_eq!(resp.conflicts[0].path, "todo.txt");
    assert!(resp.state.conflicts.contains("todo.txt"));
    assert_eq!(store.get(&user, "todo.txt").unwrap(), b"server");

    // Still conflicted with no new client change.
    let again = sync(&store, &user, resp.state.clone(), vec![]);
    assert!(!again.success);

    // Resolving to the server's content clears it.
    let resolved = sync(&store, &user, resp.state, vec![
        SyncMessage::update("todo.txt", b"server".to_vec()),
    ]);
    assert!(resolved.success, "{resolved:?}");
    assert!(resolved.state.conflicts.is_empty());
}

#[test]
fn server_deletion_reaches_the_client() {
    let (_dir, store, user) = setup();
    store.store(&user, "old.txt", b"old").unwrap();
    let base = sync(&store, &user, SyncState::default(), vec![]).state;

    store.delete(&user, "old.txt").unwrap();
    let resp = sync(&store, &user, base, vec![]);
    assert!(resp.success);
    assert_eq!(resp.updates.len(), 1);
    assert_eq!(resp.updates[0].operation, FileOperation::Delete);
    assert_eq!(resp.updates[0].path, "old.txt");
    assert!(resp.state.files.is_empty());
}

#[test]
fn traversal_in_a_change_is_rejected_not_applied() {
    let (temp_dir, store, user) = setup();
    let resp = sync(&store, &user, SyncState::default(), vec![
        SyncMessage::create("../escape.txt", b"x".to_vec()),
        SyncMessage::create("ok.txt", b"ok".to_vec()),
    ]);
    assert!(!resp.success);
    assert_eq!(resp.rejected.len(), 1);
    assert_eq!(resp.applied, vec!["ok.txt"]);
    assert!(!temp_dir.path().join("escape.txt").exists());
}
