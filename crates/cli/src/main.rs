use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use strand_storage::StoreConfigLoader;

mod commands;

use commands::Commands;

#[derive(Parser)]
#[command(name = "strand")]
#[command(about = "Inspect, verify and restore strand backups", long_about = None)]
#[command(version)]
struct Cli {
    /// Store configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    strand_utils::logging::init(&cli.log_level)
        .map_err(|e| anyhow!("failed to initialize logging: {e}"))?;

    let (config, sources) = StoreConfigLoader::load(cli.config.as_deref())?;
    tracing::debug!(?sources, "Loaded store configuration");

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    cli.command.execute(config, &mut out)
}
