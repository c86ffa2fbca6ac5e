use anyhow::{Context, Result};
use clap::Parser;
use relaygate_core::config::Config;
use relaygate_core::logging::{init_logging_with_config, LogLevel};
use std::path::PathBuf;
use tracing::info;

mod commands;

use commands::Command;

#[derive(Parser, Debug)]
#[command(name = "relaygate")]
#[command(author, version, about = "Operator tool for the relay access engine", long_about = None)]
struct Args {
    /// Configuration file; RELAYGATE_* environment variables are used otherwise
    #[arg(short, long, env = "RELAYGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::from_env().context("loading configuration from environment")?,
    };

    if let Some(level) = &args.log_level {
        let level: LogLevel = level.parse()?;
        config.logging.level = level.to_string();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    init_logging_with_config(config.logging.to_log_config())?;
    relaygate_core::metrics::init_metrics();

    info!(command = args.command.name(), "relaygate started");

    commands::execute(args.command, &config, &mut std::io::stdout()).await
}
