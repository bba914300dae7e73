//! Integration tests for the filesync backend

mod broadcast_fanout;
mod socket_session;
mod store_roundtrip;
mod sync_reconcile;
mod tree_determinism;
