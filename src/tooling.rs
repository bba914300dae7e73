//! Tooling
//!
//! The operator CLI: run the notification server, or inspect a user
//! namespace offline.

pub mod cli;

pub use cli::{Cli, CliContext, Commands};
