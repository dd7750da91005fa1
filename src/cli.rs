//! Command-line interface definitions for procredirect.
//!
//! Uses clap's derive API for type-safe argument parsing.

use crate::config::Backend;
use clap::{Parser, Subcommand};
use std::net::SocketAddrV4;
use std::path::PathBuf;

/// Redirect the traffic of selected applications into a local transparent proxy.
///
/// Matching processes (and the children they spawn) are placed in a cgroup,
/// and NAT rules scoped to that cgroup send their HTTP, HTTPS and DNS
/// traffic to the proxy. Everything else on the host is left alone.
#[derive(Parser, Debug)]
#[command(name = "procredirect")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to run (defaults to `run`).
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to additional config file.
    ///
    /// This config file is merged on top of system and user configs,
    /// giving it the highest priority (except for CLI flags).
    #[arg(short = 'c', long = "config", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Process name to redirect (repeatable).
    ///
    /// Matched against the full command line of every process, so
    /// `-p discord` also catches Discord's helper processes.
    #[arg(short = 'p', long = "process", value_name = "NAME", global = true)]
    pub processes: Vec<String>,

    /// Firewall backend used for the redirection rules.
    #[arg(short = 'b', long = "backend", value_enum, global = true)]
    pub backend: Option<Backend>,

    /// Transparent proxy endpoint.
    #[arg(long = "proxy", value_name = "ADDR:PORT", global = true)]
    pub proxy: Option<SocketAddrV4>,

    /// Increase log verbosity.
    ///
    /// Can be specified multiple times:
    /// -v    = info level
    /// -vv   = debug level
    /// -vvv  = trace level
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

/// Subcommands for procredirect.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Classify matching processes and redirect their traffic until interrupted.
    Run {
        /// Also bring up the capture interface and classify packets routed to it.
        #[arg(long)]
        capture: bool,
    },

    /// Create the capture interface and log every packet routed through it.
    Capture,

    /// Remove redirection rules and the classification group left by a crashed run.
    Cleanup,

    /// Print the firewall commands the selected backend would run.
    Rules,
}

impl Cli {
    /// Subcommand to execute.
    pub fn command(&self) -> Commands {
        self.command.unwrap_or(Commands::Run { capture: false })
    }
}
