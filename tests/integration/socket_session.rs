use filesync::server::{serve_connection, Envelope, MessageType, SessionConfig, SessionEnd};
use filesync::sync::{SyncRequest, SyncResponse};
use filesync::{ChangeBroadcaster, ChangeType, ContentStore, FileChange, FileService, UserId};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

struct Session {
    _dir: TempDir,
    service: FileService,
    user: UserId,
    client: WebSocketStream<DuplexStream>,
    handle: JoinHandle<SessionEnd>,
}

async fn open_session(config: SessionConfig) -> Session {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(ContentStore::new(dir.path()).unwrap());
    let broadcaster = Arc::new(ChangeBroadcaster::default());
    broadcaster.start().unwrap();
    let service = FileService::new(store, broadcaster);
    let user = UserId::new("alice").unwrap();

    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let server_ws = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
    let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;

    let handle = tokio::spawn({
        let service = service.clone();
        let user = user.clone();
        async move { serve_connection(server_ws, user, service, config).await.unwrap() }
    });

    Session {
        _dir: dir,
        service,
        user,
        client,
        handle,
    }
}

async fn send(client: &mut WebSocketStream<DuplexStream>, envelope: &Envelope) {
    client.send(envelope.to_message().unwrap()).await.unwrap();
}

/// Next text frame as an envelope, skipping control frames.
async fn next_envelope(client: &mut WebSocketStream<DuplexStream>) -> Envelope {
    loop {
        let message = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = message {
            return Envelope::parse(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn ping_is_answered_and_changes_are_pushed() {
    let mut session = open_session(SessionConfig::default()).await;

    send(&mut session.client, &Envelope::new(MessageType::Ping)).await;
    assert_eq!(next_envelope(&mut session.client).await.kind, MessageType::Pong);

    session
        .service
        .upload(&session.user, "inbox/new.txt", b"hello".to_vec())
        .await
        .unwrap();
    let pushed = next_envelope(&mut session.client).await;
    assert_eq!(pushed.kind, MessageType::Change);
    let change: FileChange = pushed.payload_as().unwrap();
    assert_eq!(change.kind, ChangeType::Create);
    assert_eq!(change.file.path, "inbox/new.txt");

    session.client.close(None).await.unwrap();
    let end = timeout(Duration::from_secs(5), session.handle).await.unwrap().unwrap();
    assert_eq!(end, SessionEnd::ClientClosed);
    assert_eq!(
        session.service.broadcaster().connection_count().await.unwrap(),
        0
    );
}

#[tokio::test]
async fn sync_request_is_acknowledged_with_the_response() {
    let mut session = open_session(SessionConfig::default()).await;
    session
        .service
        .store()
        .store(&session.user, "a.txt", b"server copy")
        .unwrap();

    let request = Envelope::with_payload(MessageType::Sync, &SyncRequest::default()).unwrap();
    send(&mut session.client, &request).await;

    let reply = next_envelope(&mut session.client).await;
    assert_eq!(reply.kind, MessageType::Ack);
    let response: SyncResponse = reply.payload_as().unwrap();
    assert!(response.success);
    assert_eq!(response.updates.len(), 1);
    assert_eq!(response.updates[0].path, "a.txt");

    send(&mut session.client, &Envelope::new(MessageType::Sync)).await;
    let invalid = next_envelope(&mut session.client).await;
    assert_eq!(invalid.kind, MessageType::Error);
    assert!(invalid.error.is_some());
}

#[tokio::test]
async fn silent_client_times_out() {
    let config = SessionConfig::new(Duration::from_millis(200), Duration::from_millis(100));
    let session = open_session(config).await;

    let end = timeout(Duration::from_secs(5), session.handle).await.unwrap().unwrap();
    assert_eq!(end, SessionEnd::ReadTimeout);
    drop(session.client);
}

#[tokio::test]
async fn answered_pings_keep_the_session_open_past_pong_wait() {
    let config = SessionConfig {
        pong_wait: Duration::from_millis(600),
        ping_period: Duration::from_millis(150),
        write_wait: Duration::from_millis(200),
    };
    let mut session = open_session(config).await;

    let mut pings = 0;
    let until = tokio::time::Instant::now() + Duration::from_secs(2);
    while let Ok(Some(frame)) = tokio::time::timeout_at(until, session.client.next()).await {
        if let Message::Ping(payload) = frame.unwrap() {
            pings += 1;
            session.client.send(Message::Pong(payload)).await.unwrap();
        }
    }
    assert!(pings >= 4, "only {pings} pings in two seconds");
    assert!(!session.handle.is_finished());
    assert_eq!(
        session.service.broadcaster().connection_count().await.unwrap(),
        1
    );

    send(&mut session.client, &Envelope::new(MessageType::Ping)).await;
    assert_eq!(next_envelope(&mut session.client).await.kind, MessageType::Pong);

    session.client.close(None).await.unwrap();
    let end = timeout(Duration::from_secs(5), session.handle).await.unwrap().unwrap();
    assert_eq!(end, SessionEnd::ClientClosed);
}
