//! Configuration sources, lowest precedence first.

use crate::config::{
    DEFAULT_BASE_PATH, DEFAULT_BIND, DEFAULT_PONG_WAIT_SECS, DEFAULT_WRITE_WAIT_SECS,
};
use crate::broadcast::DEFAULT_QUEUE_CAPACITY;
use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, Environment, File, FileFormat};
use std::collections::HashMap;
use std::path::Path;

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "filesync.toml";

/// Deployment variable that predates the `FILESYNC__` scheme.
pub const LEGACY_STORAGE_VAR: &str = "SYNC_STORAGE_PATH";

const ENV_PREFIX: &str = "FILESYNC";
const ENV_BASE_PATH: &str = "FILESYNC__STORAGE__BASE_PATH";

/// Environment snapshot; `None` reads the process environment.
pub type EnvOverride = Option<HashMap<String, String>>;

fn lookup(env: &EnvOverride, key: &str) -> Option<String> {
    match env {
        Some(vars) => vars.get(key).cloned(),
        None => std::env::var(key).ok(),
    }
    .filter(|value| !value.is_empty())
}

pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    config::Config::builder()
        .set_default("storage.base_path", DEFAULT_BASE_PATH)?
        .set_default("server.bind", DEFAULT_BIND)?
        .set_default("server.queue_capacity", DEFAULT_QUEUE_CAPACITY as u64)?
        .set_default("server.pong_wait_secs", DEFAULT_PONG_WAIT_SECS)?
        .set_default("server.write_wait_secs", DEFAULT_WRITE_WAIT_SECS)
}

/// An explicit file must exist; the default `filesync.toml` is optional.
pub fn add_file(
    builder: ConfigBuilder<DefaultState>,
    path: Option<&Path>,
) -> ConfigBuilder<DefaultState> {
    match path {
        Some(path) => builder.add_source(
            File::from(path.to_path_buf())
                .format(FileFormat::Toml)
                .required(true),
        ),
        None => builder.add_source(
            File::new(DEFAULT_CONFIG_FILE, FileFormat::Toml).required(false),
        ),
    }
}

/// `FILESYNC__SECTION__KEY` overlay.
pub fn add_environment(
    builder: ConfigBuilder<DefaultState>,
    env: &EnvOverride,
) -> ConfigBuilder<DefaultState> {
    builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .source(env.clone()),
    )
}

/// Apply `SYNC_STORAGE_PATH` unless the namespaced variable is set.
pub fn add_legacy(
    builder: ConfigBuilder<DefaultState>,
    env: &EnvOverride,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    if lookup(env, ENV_BASE_PATH).is_some() {
        return Ok(builder);
    }
    builder.set_override_option("storage.base_path", lookup(env, LEGACY_STORAGE_VAR))
}
