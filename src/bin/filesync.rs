//! filesync CLI Binary
//!
//! Loads configuration, installs logging and dispatches the subcommand.

use anyhow::Context;
use clap::Parser;
use filesync::config::ConfigLoader;
use filesync::logging::init_logging;
use filesync::tooling::cli::{Cli, CliContext, Commands};
use std::process;

async fn run(cli: Cli) -> anyhow::Result<Option<String>> {
    let mut config =
        ConfigLoader::load(cli.config.as_deref()).context("Error loading configuration")?;
    cli.apply_log_overrides(&mut config);
    init_logging(Some(&config.logging)).context("Error initializing logging")?;

    let context = CliContext::new(config).context("Error opening storage")?;
    match &cli.command {
        Commands::Serve { bind } => {
            context.serve(bind.as_deref()).await?;
            Ok(None)
        }
        command => Ok(Some(context.execute(command)?)),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(Some(output)) => println!("{}", output),
        Ok(None) => {}
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}
