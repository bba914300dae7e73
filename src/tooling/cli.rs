//! CLI Tooling
//!
//! `serve` runs the change socket; the remaining commands read a user
//! namespace straight from the storage base and print the result.

use crate::broadcast::ChangeBroadcaster;
use crate::config::FileSyncConfig;
use crate::error::ApiError;
use crate::hash::hash_file;
use crate::server::NotificationServer;
use crate::service::FileService;
use crate::store::ContentStore;
use crate::tree::{build_tree, TreeNode};
use crate::types::{FileMetadata, UserId};
use clap::{Parser, Subcommand};
use comfy_table::Table;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// filesync - personal file sync backend
#[derive(Parser)]
#[command(name = "filesync")]
#[command(about = "Per-user file store with live change notifications")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (defaults to ./filesync.toml when present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, file+stderr, both)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Fold the `--log-*` flags into the loaded logging section.
    pub fn apply_log_overrides(&self, config: &mut FileSyncConfig) {
        let logging = &mut config.logging;
        if let Some(level) = &self.log_level {
            logging.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            logging.format = format.clone();
        }
        if let Some(output) = &self.log_output {
            logging.output = output.clone();
        }
        if let Some(file) = &self.log_file {
            logging.file = Some(file.clone());
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the WebSocket change notification server
    Serve {
        /// Listen address (overrides server.bind)
        #[arg(long)]
        bind: Option<String>,
    },
    /// List the immediate children of a directory
    Ls {
        /// Namespace owner
        #[arg(long)]
        user: String,
        /// Directory relative to the namespace root
        #[arg(default_value = "")]
        path: String,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Print the whole namespace as a tree
    Tree {
        #[arg(long)]
        user: String,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Show metadata for one entry
    Info {
        #[arg(long)]
        user: String,
        path: String,
    },
    /// Print the SHA-256 content hash of a local file
    Hash { file: PathBuf },
}

/// CLI context: the loaded configuration and the store it points at.
pub struct CliContext {
    config: FileSyncConfig,
    store: Arc<ContentStore>,
}

impl CliContext {
    pub fn new(config: FileSyncConfig) -> Result<Self, ApiError> {
        let store = Arc::new(ContentStore::new(&config.storage.base_path)?);
        Ok(Self { config, store })
    }

    pub fn config(&self) -> &FileSyncConfig {
        &self.config
    }

    /// Run an offline command and return its printable output.
    pub fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        match command {
            Commands::Serve { .. } => Err(ApiError::ConfigError(
                "serve runs on the async runtime; use CliContext::serve".to_string(),
            )),
            Commands::Ls { user, path, format } => {
                let user = UserId::new(user.as_str())?;
                let entries = self.store.list(&user, path)?;
                match format.as_str() {
                    "json" => Ok(serde_json::to_string_pretty(&entries)?),
                    "text" => Ok(format_listing(&entries)),
                    other => Err(invalid_format(other)),
                }
            }
            Commands::Tree { user, format } => {
                let user = UserId::new(user.as_str())?;
                let tree = build_tree(&self.store.walk(&user)?);
                match format.as_str() {
                    "json" => Ok(serde_json::to_string_pretty(&tree)?),
                    "text" => Ok(format_tree(&tree)),
                    other => Err(invalid_format(other)),
                }
            }
            Commands::Info { user, path } => {
                let user = UserId::new(user.as_str())?;
                let meta = self.store.get_info(&user, path)?;
                Ok(serde_json::to_string_pretty(&meta)?)
            }
            Commands::Hash { file } => Ok(hash_file(file)?),
        }
    }

    /// Serve the change socket until ctrl-c.
    pub async fn serve(&self, bind: Option<&str>) -> Result<(), ApiError> {
        let bind = bind.unwrap_or(&self.config.server.bind);
        let broadcaster = Arc::new(ChangeBroadcaster::new(self.config.broadcaster_config()));
        broadcaster.start()?;

        let service = FileService::new(Arc::clone(&self.store), Arc::clone(&broadcaster));
        let server = NotificationServer::new(service, self.config.session_config());
        let listener = TcpListener::bind(bind).await?;
        info!(
            bind,
            base_path = %self.store.base_path().display(),
            "Starting filesync server"
        );

        let result = server
            .serve(listener, async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "Failed to listen for ctrl-c");
                }
            })
            .await;

        broadcaster.stop().await?;
        info!("Server stopped");
        result
    }
}

fn invalid_format(format: &str) -> ApiError {
    ApiError::ConfigError(format!("Invalid format: {format} (must be 'text' or 'json')"))
}

fn format_listing(entries: &[FileMetadata]) -> String {
    if entries.is_empty() {
        return "(empty)".to_string();
    }
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["Name", "Type", "Size", "Modified", "Hash"]);
    for entry in entries {
        let kind = if entry.is_dir { "dir" } else { "file" };
        let hash = entry
            .hash
            .as_deref()
            .map(|h| h.chars().take(12).collect::<String>())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            entry.name.clone(),
            kind.to_string(),
            entry.size.to_string(),
            entry.mod_time.format("%Y-%m-%d %H:%M:%S").to_string(),
            hash,
        ]);
    }
    table.to_string()
}

fn format_tree(nodes: &[TreeNode]) -> String {
    fn render(node: &TreeNode, depth: usize, out: &mut Vec<String>) {
        out.push(format!("{}{} {}", "  ".repeat(depth), node.icon, node.name));
        for child in &node.children {
            render(child, depth + 1, out);
        }
    }

    let mut lines = Vec::new();
    for node in nodes {
        render(node, 0, &mut lines);
    }
    lines.join("\n")
}
