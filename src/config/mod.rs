//! Configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file, then `FILESYNC__SECTION__KEY` environment variables, then the legacy
//! `SYNC_STORAGE_PATH` variable for the storage base.

pub mod facade;
pub mod sources;

pub use crate::logging::LoggingConfig;
pub use facade::ConfigLoader;

use crate::broadcast::{BroadcasterConfig, DEFAULT_QUEUE_CAPACITY};
use crate::error::ApiError;
use crate::server::SessionConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_PATH: &str = "/app/data";
pub const DEFAULT_BIND: &str = "0.0.0.0:8080";
pub const DEFAULT_PONG_WAIT_SECS: u64 = 60;
pub const DEFAULT_WRITE_WAIT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root under which every user namespace lives.
    pub base_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from(DEFAULT_BASE_PATH),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Pending changes per connection before it is dropped as stalled.
    pub queue_capacity: usize,
    pub pong_wait_secs: u64,
    pub write_wait_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            pong_wait_secs: DEFAULT_PONG_WAIT_SECS,
            write_wait_secs: DEFAULT_WRITE_WAIT_SECS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSyncConfig {
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

impl FileSyncConfig {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.storage.base_path.as_os_str().is_empty() {
            return Err(ApiError::ConfigError("storage.base_path is empty".to_string()));
        }
        if self.server.bind.trim().is_empty() {
            return Err(ApiError::ConfigError("server.bind is empty".to_string()));
        }
        if self.server.queue_capacity == 0 {
            return Err(ApiError::ConfigError(
                "server.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.server.pong_wait_secs < 2 {
            return Err(ApiError::ConfigError(
                "server.pong_wait_secs must be at least 2".to_string(),
            ));
        }
        if self.server.write_wait_secs == 0 {
            return Err(ApiError::ConfigError(
                "server.write_wait_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Keepalive timings; the ping period is nine tenths of the pong wait.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(
            Duration::from_secs(self.server.pong_wait_secs),
            Duration::from_secs(self.server.write_wait_secs),
        )
    }

    pub fn broadcaster_config(&self) -> BroadcasterConfig {
        BroadcasterConfig {
            queue_capacity: self.server.queue_capacity,
            ..BroadcasterConfig::default()
        }
    }
}
