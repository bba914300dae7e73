//! ConfigLoader facade over the layered sources.

use super::sources::{self, EnvOverride};
use super::FileSyncConfig;
use crate::error::ApiError;
use std::path::Path;

/// Configuration loader facade.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from defaults, `path` (or `./filesync.toml`), and the process
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<FileSyncConfig, ApiError> {
        Self::load_with_env(path, None)
    }

    /// Same as [`ConfigLoader::load`] with an explicit environment snapshot.
    pub fn load_with_env(
        path: Option<&Path>,
        env: EnvOverride,
    ) -> Result<FileSyncConfig, ApiError> {
        let builder = sources::builder_with_defaults()?;
        let builder = sources::add_file(builder, path);
        let builder = sources::add_environment(builder, &env);
        let builder = sources::add_legacy(builder, &env)?;

        let config: FileSyncConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn default() -> FileSyncConfig {
        FileSyncConfig::default()
    }
}
