//! Sync protocol
//!
//! Wire types for client catch-up, three-way reconciliation between a client
//! checkpoint, the client's local changes and server truth, and the
//! format-tagged patches used to carry content changes.

pub mod diff;
pub mod engine;
pub mod protocol;
pub mod reconcile;

pub use diff::{apply_diff, generate_diff, ContentFormat, LineOp, Patch, PatchBody};
pub use engine::{run_diff, run_sync, SyncOutcome};
pub use protocol::{
    generate_hash, validate_hash, ConflictReport, DiffRequest, DiffResponse, FileOperation,
    RejectedChange, SyncMessage, SyncRequest, SyncResponse, SyncState,
};
pub use reconcile::{plan, PathStatus, ServerAction, SyncPlan};
