//! QADash CLI - Main Entry Point
//!
//! Mounts a run view in one of its three ingestion modes and renders the
//! reconciled step table, run status and log tail.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use qadash_engine::EngineConfig;

mod commands;
mod output;

use commands::{config, replay, report, watch};

/// QADash - test run viewer
#[derive(Parser)]
#[command(name = "qadash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(long, env = "QADASH_CONFIG", default_value = "qadash.toml", global = true)]
    config: PathBuf,

    /// Backend base URL (overrides the configuration file)
    #[arg(long, env = "QADASH_BASE_URL", global = true)]
    base_url: Option<String>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow a run over the live event stream
    Watch(watch::WatchArgs),

    /// Replay a captured run log
    Replay(replay::ReplayArgs),

    /// Load a run's precomputed report
    Report(report::ReportArgs),

    /// Inspect or create the configuration file
    #[command(subcommand)]
    Config(config::ConfigCommands),

    /// Show version information
    Version,
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = EngineConfig::load(&cli.config)?;
    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Config(config::ConfigCommands::Init { force }) = &cli.command {
        return config::init(&cli.config, *force);
    }

    let config = load_config(&cli)?;
    let snapshot = match cli.command {
        Commands::Watch(args) => watch::execute(args, &config, cli.format).await?,
        Commands::Replay(args) => replay::execute(args, &config, cli.format).await?,
        Commands::Report(args) => report::execute(args, &config, cli.format).await?,
        Commands::Config(cmd) => {
            config::execute(cmd, &config, &cli.config, cli.format)?;
            return Ok(());
        }
        Commands::Version => {
            println!("QADash CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Run-view engine v{}", qadash_common::VERSION);
            return Ok(());
        }
    };

    let code = commands::exit_code(&snapshot);
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
