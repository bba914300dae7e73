use filesync::{BroadcasterConfig, ChangeBroadcaster, ChangeType, FileChange, FileMetadata, UserId};

fn user(name: &str) -> UserId {
    UserId::new(name).unwrap()
}

fn change(path: &str) -> FileChange {
    FileChange::new(ChangeType::Create, FileMetadata::removed(path, false))
}

#[tokio::test]
async fn every_connection_of_the_owner_receives_the_change() {
    let broadcaster = ChangeBroadcaster::default();
    broadcaster.start().unwrap();

    let mut alice_subs = Vec::new();
    for _ in 0..3 {
        alice_subs.push(broadcaster.register(user("alice")).await.unwrap());
    }
    let mut bob = broadcaster.register(user("bob")).await.unwrap();

    broadcaster.broadcast(&user("alice"), change("shared.txt")).await;
    assert_eq!(broadcaster.connection_count().await.unwrap(), 4);

    for sub in &mut alice_subs {
        let received = sub.recv().await.unwrap();
        assert_eq!(received.kind, ChangeType::Create);
        assert_eq!(received.file.path, "shared.txt");
    }
    assert!(bob.try_recv().is_none());
    broadcaster.stop().await.unwrap();
}

#[tokio::test]
async fn stalled_consumer_is_dropped_without_blocking_others() {
    let broadcaster = ChangeBroadcaster::new(BroadcasterConfig {
        queue_capacity: 10,
        ..BroadcasterConfig::default()
    });
    broadcaster.start().unwrap();

    let mut stalled = broadcaster.register(user("alice")).await.unwrap();
    let mut active = broadcaster.register(user("alice")).await.unwrap();

    let mut seen = 0;
    for i in 0..11 {
        broadcaster.broadcast(&user("alice"), change(&format!("f{i}.txt"))).await;
        assert!(active.recv().await.is_some());
        seen += 1;
    }
    assert_eq!(seen, 11);

    assert!(!broadcaster.is_registered(stalled.id).await.unwrap());
    assert!(broadcaster.is_registered(active.id).await.unwrap());

    let mut drained = 0;
    while stalled.recv().await.is_some() {
        drained += 1;
    }
    assert_eq!(drained, 10);

    broadcaster.unregister(stalled.id).await;
    assert_eq!(broadcaster.connection_count().await.unwrap(), 1);
    broadcaster.stop().await.unwrap();
}

#[tokio::test]
async fn registration_before_start_is_buffered() {
    let broadcaster = ChangeBroadcaster::default();
    let mut sub = broadcaster.register(user("alice")).await.unwrap();
    broadcaster.broadcast(&user("alice"), change("early.txt")).await;

    broadcaster.start().unwrap();
    assert_eq!(sub.recv().await.unwrap().file.path, "early.txt");
    broadcaster.stop().await.unwrap();
    assert!(!broadcaster.is_running());
}
