//! Subcommand dispatch for procredirect.
//!
//! Every privileged subcommand runs on a multi-threaded tokio runtime with
//! SIGINT and SIGTERM wired to a shared shutdown channel.

use anyhow::{Context, Result, bail};
use nix::unistd::Uid;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cgroup::{CGROUP2_MOUNT, hierarchy_available};
use crate::cli::Commands;
use crate::command::{CommandRunner, SystemRunner};
use crate::config::{Config, RunSettings};
use crate::orchestrator::{Orchestrator, run_capture};
use crate::packet::{LogSink, PacketClassifier, TunDevice};
use crate::telemetry::{AuditEvent, AuditLogger};

/// Execute `command` against the merged configuration.
pub fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Run { capture } => {
            let settings = RunSettings::from_config(config).context("Invalid configuration")?;
            require_root("run")?;
            require_cgroup_v2()?;
            block_on(run(settings, capture))
        }
        Commands::Capture => {
            let settings =
                RunSettings::for_maintenance(config).context("Invalid configuration")?;
            require_root("capture")?;
            block_on(capture(settings))
        }
        Commands::Cleanup => {
            let settings =
                RunSettings::for_maintenance(config).context("Invalid configuration")?;
            require_root("cleanup")?;
            cleanup(settings)
        }
        Commands::Rules => {
            let settings =
                RunSettings::for_maintenance(config).context("Invalid configuration")?;
            print_rules(settings);
            Ok(())
        }
    }
}

async fn run(settings: RunSettings, with_capture: bool) -> Result<()> {
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let audit = Arc::new(AuditLogger::connect_or_null());
    let mut orchestrator = Orchestrator::from_settings(settings.clone(), runner.clone(), audit);

    if with_capture {
        let device = TunDevice::create(&settings.capture, runner)
            .context("Failed to set up capture interface")?;
        let classifier = PacketClassifier::new(device, LogSink, usize::from(settings.capture.mtu));
        orchestrator = orchestrator.with_classifier(classifier);
    }

    let shutdown_rx = shutdown_on_signal();
    let summary = orchestrator.run(shutdown_rx, None).await?;
    debug!("Run summary: {:?}", summary);
    Ok(())
}

async fn capture(settings: RunSettings) -> Result<()> {
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let device = TunDevice::create(&settings.capture, runner)
        .context("Failed to set up capture interface")?;
    info!("Capturing on {}; press Ctrl-C to stop", device.name());

    let classifier = PacketClassifier::new(device, LogSink, usize::from(settings.capture.mtu));
    let stats = run_capture(classifier, shutdown_on_signal()).await?;
    info!("Capture finished: {} routed, {} dropped", stats.routed, stats.dropped);
    Ok(())
}

fn cleanup(settings: RunSettings) -> Result<()> {
    let audit = Arc::new(AuditLogger::connect_or_null());
    let orchestrator = Orchestrator::from_settings(settings, Arc::new(SystemRunner), audit.clone());

    match orchestrator.cleanup() {
        Ok(removed) => {
            println!("Removed {} redirection rules and the classification group", removed);
            Ok(())
        }
        Err(e) => {
            audit.log(AuditEvent::FatalError {
                error: e.to_string(),
            });
            Err(e).context("Cleanup incomplete")
        }
    }
}

fn print_rules(settings: RunSettings) {
    let orchestrator = Orchestrator::from_settings(
        settings,
        Arc::new(SystemRunner),
        Arc::new(AuditLogger::new_null()),
    );
    let plan = orchestrator.plan();

    println!("# backend: {}", plan.backend);
    println!("# install");
    for line in &plan.install {
        println!("{}", line);
    }
    println!("# remove");
    for line in &plan.remove {
        println!("{}", line);
    }
}

fn require_root(subcommand: &str) -> Result<()> {
    if !Uid::effective().is_root() {
        bail!("'{}' must be run as root", subcommand);
    }
    Ok(())
}

fn require_cgroup_v2() -> Result<()> {
    if !hierarchy_available(std::path::Path::new(CGROUP2_MOUNT)) {
        bail!("No cgroup v2 hierarchy mounted at {}", CGROUP2_MOUNT);
    }
    Ok(())
}

fn block_on<F: std::future::Future<Output = Result<()>>>(future: F) -> Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;
    rt.block_on(future)
}

/// Watch channel that turns true on SIGINT or SIGTERM.
///
/// Must be called inside the runtime.
fn shutdown_on_signal() -> watch::Receiver<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutting down...");
        let _ = shutdown_tx.send(true);
    });

    shutdown_rx
}

async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => debug!("Received SIGINT"),
                _ = sigterm.recv() => debug!("Received SIGTERM"),
            }
        }
        Err(e) => {
            warn!("SIGTERM handler unavailable: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}
