//! Per-connection session
//!
//! A session runs a read loop and a write loop over the split socket. They
//! are joined with `tokio::select!`, so whichever ends first tears down the
//! other. The read loop enforces a deadline that only a pong refreshes. The
//! write loop forwards broadcast changes and read-loop replies, and sends a
//! keepalive ping every `ping_period`. Every socket write is bounded by
//! `write_wait`.

use crate::broadcast::Subscription;
use crate::error::ApiError;
use crate::server::message::{Envelope, MessageType};
use crate::service::FileService;
use crate::sync::{DiffRequest, SyncRequest};
use crate::types::UserId;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

const REPLY_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Read deadline, refreshed whenever a pong arrives.
    pub pong_wait: Duration,
    /// Keepalive interval. Must be shorter than `pong_wait`.
    pub ping_period: Duration,
    /// Bound on any single socket write.
    pub write_wait: Duration,
}

impl SessionConfig {
    /// Derive the ping period as nine tenths of `pong_wait`.
    pub fn new(pong_wait: Duration, write_wait: Duration) -> Self {
        Self {
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            write_wait,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), Duration::from_secs(10))
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    ClientClosed,
    ReadTimeout,
    ReadError(String),
    WriteTimeout,
    WriteError(String),
    /// The outbound queue was closed: dropped as a slow consumer, or the
    /// broadcaster stopped.
    QueueClosed,
}

type Sink<S> = SplitSink<WebSocketStream<S>, Message>;
type Stream<S> = SplitStream<WebSocketStream<S>>;

/// Drive one upgraded socket for `user` until either side gives up.
pub async fn serve_connection<S>(
    ws: WebSocketStream<S>,
    user: UserId,
    service: FileService,
    config: SessionConfig,
) -> Result<SessionEnd, ApiError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut subscription = service.broadcaster().register(user.clone()).await?;
    let connection_id = subscription.id;
    debug!(connection_id, user = %user, "Session started");

    let (mut sink, mut stream) = ws.split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<Envelope>(REPLY_CAPACITY);

    let end = tokio::select! {
        end = read_loop(&mut stream, &user, &service, &reply_tx, config) => end,
        end = write_loop(&mut sink, &mut subscription, &mut reply_rx, config) => end,
    };

    service.broadcaster().unregister(connection_id).await;
    if timeout(config.write_wait, sink.close()).await.is_err() {
        debug!(connection_id, "Timed out closing socket");
    }

    match &end {
        SessionEnd::ClientClosed => info!(connection_id, user = %user, "Session closed by client"),
        other => warn!(connection_id, user = %user, reason = ?other, "Session ended"),
    }
    Ok(end)
}

async fn read_loop<S>(
    stream: &mut Stream<S>,
    user: &UserId,
    service: &FileService,
    replies: &mpsc::Sender<Envelope>,
    config: SessionConfig,
) -> SessionEnd
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut deadline = Instant::now() + config.pong_wait;
    loop {
        let message = match timeout_at(deadline, stream.next()).await {
            Err(_) => return SessionEnd::ReadTimeout,
            Ok(None) => return SessionEnd::ClientClosed,
            Ok(Some(Err(e))) => return SessionEnd::ReadError(e.to_string()),
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Pong(_) => deadline = Instant::now() + config.pong_wait,
            Message::Text(text) => {
                if let Some(reply) = handle_text(&text, user, service).await {
                    if replies.send(reply).await.is_err() {
                        return SessionEnd::QueueClosed;
                    }
                }
            }
            Message::Close(_) => return SessionEnd::ClientClosed,
            Message::Ping(_) | Message::Binary(_) | Message::Frame(_) => {}
        }
    }
}

/// Answer one client frame. `None` means no reply is owed.
async fn handle_text(text: &str, user: &UserId, service: &FileService) -> Option<Envelope> {
    let envelope = match Envelope::parse(text) {
        Ok(envelope) => envelope,
        Err(e) => return Some(Envelope::error(format!("invalid message: {e}"))),
    };

    let reply = match envelope.kind {
        MessageType::Ping => Ok(Envelope::new(MessageType::Pong)),
        MessageType::Sync => match envelope.payload_as::<SyncRequest>() {
            Ok(request) => service
                .sync(user, request)
                .await
                .and_then(|resp| Ok(Envelope::with_payload(MessageType::Ack, &resp)?)),
            Err(e) => Ok(Envelope::error(format!("invalid sync request: {e}"))),
        },
        MessageType::Diff => match envelope.payload_as::<DiffRequest>() {
            Ok(request) => service
                .diff(user, request)
                .await
                .and_then(|resp| Ok(Envelope::with_payload(MessageType::Ack, &resp)?)),
            Err(e) => Ok(Envelope::error(format!("invalid diff request: {e}"))),
        },
        other => {
            debug!(user = %user, kind = ?other, "Ignoring client frame");
            return None;
        }
    };

    Some(reply.unwrap_or_else(|e| Envelope::error(e.to_string())))
}

async fn write_loop<S>(
    sink: &mut Sink<S>,
    subscription: &mut Subscription,
    replies: &mut mpsc::Receiver<Envelope>,
    config: SessionConfig,
) -> SessionEnd
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut ticker = interval_at(Instant::now() + config.ping_period, config.ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let outbound = tokio::select! {
            change = subscription.recv() => match change {
                Some(change) => Envelope::change(&change).and_then(|env| env.to_message()),
                None => return SessionEnd::QueueClosed,
            },
            reply = replies.recv() => match reply {
                Some(reply) => reply.to_message(),
                None => return SessionEnd::QueueClosed,
            },
            _ = ticker.tick() => Ok(Message::Ping(Vec::new())),
        };

        let message = match outbound {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Dropping unserializable frame");
                continue;
            }
        };

        match timeout(config.write_wait, sink.send(message)).await {
            Err(_) => return SessionEnd::WriteTimeout,
            Ok(Err(e)) => return SessionEnd::WriteError(e.to_string()),
            Ok(Ok(())) => {}
        }
    }
}
