//! Notification socket server
//!
//! Accepts WebSocket upgrades on the change endpoints. The caller's identity
//! comes from a header set by the outer auth layer; requests without one, or
//! for any other path, are refused during the handshake.

pub mod connection;
pub mod message;

pub use connection::{serve_connection, SessionConfig, SessionEnd};
pub use message::{Envelope, MessageType};

use crate::error::{ApiError, StoreError};
use crate::service::FileService;
use crate::types::UserId;
use std::future::Future;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{debug, info, warn};

/// Paths that upgrade to the change socket.
pub const CHANGE_PATHS: [&str; 3] = ["/changes", "/ws", "/api/changes"];

/// Header carrying the authenticated user id.
pub const USER_HEADER: &str = "x-forwarded-user";

fn reject(status: StatusCode, message: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(message.to_string()));
    *response.status_mut() = status;
    response
}

/// Check the upgrade request's path and identity.
pub fn authorize(request: &Request) -> Result<UserId, ErrorResponse> {
    if !CHANGE_PATHS.contains(&request.uri().path()) {
        return Err(reject(StatusCode::NOT_FOUND, "not found"));
    }
    let header = request
        .headers()
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "missing identity"))?;
    UserId::new(header.trim()).map_err(|_| reject(StatusCode::UNAUTHORIZED, "invalid identity"))
}

/// Run the WebSocket handshake, returning the socket and the caller.
pub async fn upgrade<S>(stream: S) -> Result<(WebSocketStream<S>, UserId), ApiError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut identity = None;
    let ws = accept_hdr_async(
        stream,
        |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let user = authorize(request)?;
            identity = Some(user);
            Ok(response)
        },
    )
    .await?;
    let user = identity
        .ok_or_else(|| StoreError::Validation("handshake completed without identity".to_string()))?;
    Ok((ws, user))
}

pub struct NotificationServer {
    service: FileService,
    session: SessionConfig,
}

impl NotificationServer {
    pub fn new(service: FileService, session: SessionConfig) -> Self {
        Self { service, session }
    }

    /// Accept connections until `shutdown` resolves, then drop every live
    /// session.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), ApiError>
    where
        F: Future<Output = ()> + Send,
    {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "Notification server listening");
        }
        tokio::pin!(shutdown);
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };
                    let service = self.service.clone();
                    let session = self.session;
                    sessions.spawn(async move {
                        match upgrade(stream).await {
                            Ok((ws, user)) => {
                                debug!(%peer, user = %user, "Upgraded connection");
                                if let Err(e) = serve_connection(ws, user, service, session).await {
                                    warn!(%peer, error = %e, "Session failed");
                                }
                            }
                            Err(e) => debug!(%peer, error = %e, "Handshake rejected"),
                        }
                    });
                }
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
            }
        }

        info!(live = sessions.len(), "Notification server shutting down");
        sessions.abort_all();
        while sessions.join_next().await.is_some() {}
        Ok(())
    }
}
