//! procredirect: per-application transparent proxy redirection.
//!
//! Parses the command line, merges the configuration layers, sets up stderr
//! logging and hands off to the subcommand.
//!
//! # Logging
//!
//! - **Diagnostics** go to stderr through `tracing`
//! - **Audit events** (session start/end, group and rule changes, membership)
//!   go to syslog under the `PROCREDIRECT` tag

use anyhow::{Context, Result};
use clap::Parser;
use procredirect::{cli::Cli, cli_handler, config::ConfigLoader};
use tracing::debug;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load(&cli)
        .context("Failed to load configuration")?;

    init_tracing(cli.verbose, config.general.log_level.as_deref())?;
    debug!("Parsed CLI arguments: {:?}", cli);
    debug!("Loaded configuration: {:?}", config);

    cli_handler::handle_command(cli.command(), &config)
}

/// Initialize the tracing subscriber for stderr diagnostics.
///
/// # Verbosity Levels
/// - 0 (default): `RUST_LOG`, then `general.log_level`, then warnings only
/// - 1 (-v): Info level
/// - 2 (-vv): Debug level
/// - 3+ (-vvv): Trace level
fn init_tracing(verbose: u8, config_level: Option<&str>) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = match verbose {
        0 => EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(config_level.unwrap_or("warn")))
            .context("Invalid general.log_level")?,
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
