use filesync::hash::hash_bytes;
use filesync::{ContentStore, StoreError, UserId};
use tempfile::TempDir;

fn user(name: &str) -> UserId {
    UserId::new(name).unwrap()
}

#[test]
fn stored_content_reads_back_with_its_hash() {
    let temp_dir = TempDir::new().unwrap();
    let store = ContentStore::new(temp_dir.path()).unwrap();
    let alice = user("alice");

    let meta = store.store(&alice, "docs/notes/today.md", b"# today\n").unwrap();
    assert_eq!(meta.path, "docs/notes/today.md");
    assert_eq!(meta.name, "today.md");
    assert_eq!(meta.size, 8);
    assert_eq!(meta.hash.as_deref(), Some(hash_bytes(b"# today\n").as_str()));
    assert_eq!(store.get(&alice, "docs/notes/today.md").unwrap(), b"# today\n");

    let info = store.get_info(&alice, "docs").unwrap();
    assert!(info.is_dir);
    assert!(info.hash.is_none());
}

#[test]
fn namespaces_are_isolated() {
    let temp_dir = TempDir::new().unwrap();
    let store = ContentStore::new(temp_dir.path()).unwrap();
    store.store(&user("alice"), "secret.txt", b"a").unwrap();

    let err = store.get(&user("bob"), "secret.txt").unwrap_err();
    assert!(err.is_not_found());
    assert!(store.list(&user("bob"), "").unwrap().is_empty());
}

#[test]
fn escaping_paths_are_rejected_before_io() {
    let temp_dir = TempDir::new().unwrap();
    let store = ContentStore::new(temp_dir.path()).unwrap();
    let alice = user("alice");

    for bad in ["../bob/x", "a/../../x", "/etc/passwd", ""] {
        let err = store.store(&alice, bad, b"x").unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)), "{bad:?}: {err}");
    }
    assert!(!temp_dir.path().join("bob").exists());
}

#[test]
fn move_then_delete() {
    let temp_dir = TempDir::new().unwrap();
    let store = ContentStore::new(temp_dir.path()).unwrap();
    let alice = user("alice");
    store.store(&alice, "a.txt", b"moving").unwrap();

    store.move_entry(&alice, "a.txt", "archive/a.txt").unwrap();
    assert!(!store.exists(&alice, "a.txt").unwrap());
    assert_eq!(store.get(&alice, "archive/a.txt").unwrap(), b"moving");

    store.delete(&alice, "archive/a.txt").unwrap();
    assert!(store.get(&alice, "archive/a.txt").unwrap_err().is_not_found());
    assert!(store.delete(&alice, "archive/a.txt").unwrap_err().is_not_found());
}

#[test]
fn listing_hides_temp_files_and_version_dirs() {
    let temp_dir = TempDir::new().unwrap();
    let store = ContentStore::new(temp_dir.path()).unwrap();
    let alice = user("alice");
    store.store(&alice, "keep.txt", b"k").unwrap();

    let root = store.user_root(&alice);
    std::fs::write(root.join(".filesync-partial"), b"tmp").unwrap();
    std::fs::create_dir_all(root.join(".versions")).unwrap();

    let names: Vec<_> = store
        .list(&alice, "")
        .unwrap()
        .into_iter()
        .map(|m| m.name)
        .collect();
    assert_eq!(names, vec!["keep.txt"]);
    assert_eq!(store.walk(&alice).unwrap().len(), 1);
}

#[cfg(unix)]
#[test]
fn broken_symlink_does_not_fail_listing() {
    let temp_dir = TempDir::new().unwrap();
    let store = ContentStore::new(temp_dir.path()).unwrap();
    let alice = user("alice");
    store.store(&alice, "real.txt", b"r").unwrap();

    let root = store.user_root(&alice);
    std::os::unix::fs::symlink(root.join("missing-target"), root.join("dangling")).unwrap();

    let listed = store.list(&alice, "").unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].path, "real.txt");
}
