//! Tally - usage reporter
//!
//! # Usage
//!
//! ```bash
//! # Run the reporter daemon (default)
//! tally
//! tally --config configs/tally.toml
//!
//! # Show exactly what would be reported
//! tally show --json
//!
//! # Send one usage count now
//! tally send --count 5 --type API_COUNT
//!
//! # When does each job run next?
//! tally next-run
//! ```

mod cmd;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tally_config::{Config, LogConfig, LogFormat, LogOutput};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Tally - usage reporter
#[derive(Parser, Debug)]
#[command(name = "tally")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (error if specified but not found)
    #[arg(short, long, global = true, env = "TALLY_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error). Overrides config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the reporter until interrupted
    Serve,

    /// Show the payloads that would be reported
    Show(cmd::show::ShowArgs),

    /// Send a single report now
    Send(cmd::send::SendArgs),

    /// Show when each job runs next
    NextRun(cmd::next_run::NextRunArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Some(Command::Show(args)) => {
            // Output-only commands don't need logging
            cmd::show::run(config_path, args)
        }
        Some(Command::NextRun(args)) => cmd::next_run::run(config_path, args),
        Some(Command::Send(args)) => {
            let config = cmd::load_config(config_path)?;
            init_logging(&resolve_log_level(cli.log_level.as_deref(), &config), &config.log)?;
            cmd::send::run(config, args).await
        }
        Some(Command::Serve) | None => {
            let config = cmd::load_config(config_path)?;
            init_logging(&resolve_log_level(cli.log_level.as_deref(), &config), &config.log)?;
            cmd::serve::run(config).await
        }
    }
}

/// Resolve log level: CLI flag > config file > default "info"
fn resolve_log_level(cli_level: Option<&str>, config: &Config) -> String {
    match cli_level {
        Some(level) => level.to_string(),
        None => config.log.level.as_str().to_string(),
    }
}

/// Initialize the tracing subscriber for logging
fn init_logging(level: &str, log: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    let layer = match (log.format, log.output) {
        (LogFormat::Console, LogOutput::Stdout) => fmt::layer().with_target(true).boxed(),
        (LogFormat::Console, LogOutput::Stderr) => fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        (LogFormat::Json, LogOutput::Stdout) => fmt::layer().json().boxed(),
        (LogFormat::Json, LogOutput::Stderr) => {
            fmt::layer().json().with_writer(std::io::stderr).boxed()
        }
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    Ok(())
}
