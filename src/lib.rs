//! filesync: Personal File Sync Backend
//!
//! Per-user file namespaces on local disk, addressed by relative path and
//! fingerprinted with SHA-256. Mutations fan out to the owner's live
//! WebSocket connections, and clients reconcile offline edits through a
//! three-way sync round.

pub mod broadcast;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod hash;
pub mod logging;
pub mod path;
pub mod server;
pub mod service;
pub mod store;
pub mod sync;
pub mod tooling;
pub mod tree;
pub mod types;

pub use broadcast::{BroadcasterConfig, ChangeBroadcaster, Subscription};
pub use error::{ApiError, StoreError, SyncError};
pub use service::FileService;
pub use store::ContentStore;
pub use types::{ChangeType, FileChange, FileMetadata, UserId};
