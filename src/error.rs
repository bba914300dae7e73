//! Error types
//!
//! One error enum per layer: [`StoreError`] for the per-user store and tree
//! walk, [`SyncError`] for reconciliation and patches, and [`ApiError`] at the
//! service, socket and CLI boundary.

use std::io;
use thiserror::Error;

/// Errors raised by the content store and metadata builder.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Unsafe or empty path, bad user id, or wrong entry kind. Raised before any I/O.
    #[error("Invalid path: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A conditional write found the path in a different state than expected.
    #[error("Modified concurrently: {0}")]
    Modified(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    /// Classify an I/O error for `path`, keeping "not found" distinct from
    /// other failures.
    pub fn from_io(err: io::Error, path: &str) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            StoreError::NotFound(path.to_string())
        } else {
            StoreError::Io(err)
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, StoreError::Validation(_))
    }

    pub fn is_modified(&self) -> bool {
        matches!(self, StoreError::Modified(_))
    }
}

/// Errors raised while reconciling client and server state.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed message, bad hash, or unsafe path in a sync request.
    #[error("Invalid sync message: {0}")]
    Validation(String),

    /// Both sides changed a path since the last common version.
    #[error("Conflict on {path}")]
    Conflict { path: String },

    /// Content or patch body could not be decoded or applied.
    #[error("Decode error: {0}")]
    Decode(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    pub fn is_validation(&self) -> bool {
        match self {
            SyncError::Validation(_) | SyncError::Decode(_) => true,
            SyncError::Store(inner) => inner.is_validation(),
            SyncError::Conflict { .. } => false,
        }
    }
}

/// Errors at the API boundary (service, socket server, CLI).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Broadcaster error: {0}")]
    Broadcaster(String),

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for ApiError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

impl ApiError {
    /// HTTP status an outer routing layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::Store(err) | ApiError::Sync(SyncError::Store(err)) => {
                if err.is_not_found() {
                    404
                } else if err.is_modified() {
                    409
                } else if err.is_validation() {
                    400
                } else {
                    500
                }
            }
            ApiError::Sync(SyncError::Conflict { .. }) => 409,
            ApiError::Sync(_) => 400,
            ApiError::Json(_) => 400,
            _ => 500,
        }
    }
}
