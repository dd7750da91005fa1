//! Control-plane lifecycle.
//!
//! Startup runs strictly in order: create the classification group, install
//! the redirection rules, signal ready, then start the tasks (one locator
//! per process name, the reconciliation loop, the status endpoint and the
//! optional packet classifier). Shutdown runs in reverse: every task is told
//! to stop through one watch channel and joined, then the rules are removed,
//! then the group. Teardown runs whether the run ended by signal, by a
//! task error or by a task ending early. A task that panics counts as one
//! that ended early.

use crate::cgroup::{CgroupError, ClassificationGroup};
use crate::command::CommandRunner;
use crate::config::RunSettings;
use crate::packet::{ClassifierStats, PacketClassifier, PacketError, PacketSource, RouteSink};
use crate::process::{ProcessLocator, ProcessTable, ProcfsTable};
use crate::reconcile::ReconciliationLoop;
use crate::redirect::{RedirectError, RuleManager, RulePlan, backend_for};
use crate::status::{StatusError, StatusServer};
use crate::telemetry::{AuditEvent, AuditLogger};
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// How long tasks get to stop after shutdown is broadcast.
pub const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors that end a run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Classification group could not be created or resolved.
    #[error(transparent)]
    Group(#[from] CgroupError),

    /// Redirection rules could not be installed.
    #[error(transparent)]
    Redirect(#[from] RedirectError),

    /// The packet classifier's interface failed.
    #[error(transparent)]
    Packet(#[from] PacketError),

    /// The status endpoint failed.
    #[error(transparent)]
    Status(#[from] StatusError),

    /// A task panicked or could not be started.
    #[error("Task {name} failed: {message}")]
    Task {
        /// Which task.
        name: String,
        /// What happened.
        message: String,
    },
}

/// Outcome of a clean run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Distinct PIDs classified.
    pub members: usize,
    /// Wall-clock duration.
    pub duration: Duration,
}

/// What a supervised task reports when it ends: its name and result.
type TaskOutcome = (&'static str, Result<(), OrchestratorError>);

type PacketFuture = Pin<Box<dyn Future<Output = Result<ClassifierStats, PacketError>> + Send>>;
type PacketTask = Box<dyn FnOnce(watch::Receiver<bool>) -> PacketFuture + Send + Sync>;

/// Owns every task of one run.
pub struct Orchestrator {
    settings: RunSettings,
    group: Arc<ClassificationGroup>,
    rules: RuleManager,
    table: Arc<dyn ProcessTable>,
    audit: Arc<AuditLogger>,
    packet_task: Option<PacketTask>,
}

impl Orchestrator {
    /// Assemble an orchestrator from its parts.
    pub fn new(
        settings: RunSettings,
        group: ClassificationGroup,
        rules: RuleManager,
        table: Arc<dyn ProcessTable>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            settings,
            group: Arc::new(group),
            rules,
            table,
            audit,
            packet_task: None,
        }
    }

    /// Orchestrator acting on the host: real cgroup, configured backend, `/proc`.
    pub fn from_settings(
        settings: RunSettings,
        runner: Arc<dyn CommandRunner>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        let group = ClassificationGroup::new(&settings.cgroup_path);
        let backend = backend_for(settings.backend, &settings.nft_table, runner);
        let rules = RuleManager::new(backend, settings.proxy);
        Self::new(settings, group, rules, Arc::new(ProcfsTable::new()), audit)
    }

    /// Also run `classifier` once ready. Its read failure is fatal to the run.
    pub fn with_classifier<S, R>(mut self, classifier: PacketClassifier<S, R>) -> Self
    where
        S: PacketSource + 'static,
        R: RouteSink + 'static,
    {
        self.packet_task = Some(Box::new(move |shutdown_rx| {
            Box::pin(async move {
                let mut classifier = classifier;
                classifier.run(shutdown_rx).await
            })
        }));
        self
    }

    /// Run until `shutdown_rx` turns true (or its sender is dropped) or a
    /// task fails, panics or ends on its own.
    ///
    /// `ready_tx` fires once the group exists and the rules are installed.
    pub async fn run(
        mut self,
        mut shutdown_rx: watch::Receiver<bool>,
        ready_tx: Option<oneshot::Sender<()>>,
    ) -> Result<RunSummary, OrchestratorError> {
        let started = Instant::now();
        let settings = self.settings.clone();

        self.audit.log(AuditEvent::SessionStart {
            pid: std::process::id(),
            processes: settings.processes.clone(),
            backend: self.rules.backend_name().to_string(),
            proxy: settings.proxy.to_string(),
        });

        // Group before rules
        if let Err(e) = self.group.create() {
            return Err(self.fatal(e.into()));
        }
        let selector = match self.group.selector() {
            Ok(selector) => selector,
            Err(e) => {
                self.destroy_group();
                return Err(self.fatal(e.into()));
            }
        };
        self.audit.log(AuditEvent::GroupCreated {
            path: self.group.path().display().to_string(),
            inode: selector.inode,
        });

        // Rules before ready
        match self.rules.install(&selector) {
            Ok(count) => self.audit.log(AuditEvent::RulesInstalled {
                backend: self.rules.backend_name().to_string(),
                count,
            }),
            Err(e) => {
                self.destroy_group();
                return Err(self.fatal(e.into()));
            }
        }

        if let Some(tx) = ready_tx
            && tx.send(()).is_err()
        {
            debug!("Ready receiver dropped");
        }
        info!(
            "Redirecting {:?} to {} via {}",
            settings.processes,
            settings.proxy,
            self.rules.backend_name()
        );

        let (task_shutdown_tx, task_shutdown_rx) = watch::channel(false);
        let mut tasks: JoinSet<TaskOutcome> = JoinSet::new();

        let (batch_tx, batch_rx) = mpsc::channel(settings.processes.len().max(1));
        for name in &settings.processes {
            let locator = ProcessLocator::new(name.clone(), self.table.clone(), settings.poll_interval);
            let (batch_tx, shutdown_rx) = (batch_tx.clone(), task_shutdown_rx.clone());
            tasks.spawn(async move {
                locator.run(batch_tx, shutdown_rx).await;
                ("process locator", Ok(()))
            });
        }
        drop(batch_tx);

        let reconciler = ReconciliationLoop::new(self.group.clone(), self.audit.clone());
        let members = reconciler.members();
        let reconcile_shutdown_rx = task_shutdown_rx.clone();
        tasks.spawn(async move {
            reconciler.run(batch_rx, reconcile_shutdown_rx).await;
            ("reconciliation loop", Ok(()))
        });

        if let Some(addr) = settings.status_listen {
            let shutdown_rx = task_shutdown_rx.clone();
            tasks.spawn(async move { ("status endpoint", serve_status(addr, shutdown_rx).await) });
        }

        if let Some(packet_task) = self.packet_task.take() {
            let packet_future = packet_task(task_shutdown_rx.clone());
            tasks.spawn(async move {
                let result = packet_future.await.map(|stats| {
                    debug!("Packet classifier finished: {:?}", stats);
                });
                ("packet classifier", result.map_err(OrchestratorError::from))
            });
        }

        // Every task runs until shutdown, so any task ending first is fatal
        let fatal = tokio::select! {
            _ = wait_for_shutdown(&mut shutdown_rx) => {
                info!("Shutdown requested");
                None
            }
            Some(joined) = tasks.join_next() => {
                let err = task_failure(joined);
                error!("Fatal error: {}", err);
                Some(err)
            }
        };

        // Stop tasks before touching rules
        let _ = task_shutdown_tx.send(true);
        join_all(&mut tasks).await;

        match self.rules.remove(&selector) {
            Ok(removed) => self.audit.log(AuditEvent::RulesRemoved {
                backend: self.rules.backend_name().to_string(),
                removed,
                failed: 0,
            }),
            Err(e) => {
                warn!("Rule removal incomplete: {}", e);
                let failed = match &e {
                    RedirectError::RuleRemoveFailed { failures } => failures.len(),
                    _ => self.rules.rules().len(),
                };
                self.audit.log(AuditEvent::RulesRemoved {
                    backend: self.rules.backend_name().to_string(),
                    removed: self.rules.rules().len().saturating_sub(failed),
                    failed,
                });
            }
        }
        self.destroy_group();

        let summary = RunSummary {
            members: members.len(),
            duration: started.elapsed(),
        };
        self.audit.log(AuditEvent::SessionEnd {
            duration_sec: summary.duration.as_secs(),
            members: summary.members,
        });

        match fatal {
            Some(err) => Err(self.fatal(err)),
            None => {
                info!(
                    "Stopped after {:?}; {} processes were classified",
                    summary.duration, summary.members
                );
                Ok(summary)
            }
        }
    }

    /// Remove rules and group left behind by an earlier run.
    pub fn cleanup(&self) -> Result<usize, OrchestratorError> {
        let selector = self
            .group
            .selector()
            .unwrap_or_else(|_| self.group.path_selector());

        let removed = self.rules.remove(&selector)?;
        self.audit.log(AuditEvent::RulesRemoved {
            backend: self.rules.backend_name().to_string(),
            removed,
            failed: 0,
        });
        self.group.destroy()?;
        self.audit.log(AuditEvent::GroupRemoved {
            path: self.group.path().display().to_string(),
        });
        Ok(removed)
    }

    /// Rules the configured backend would install, without running anything.
    pub fn plan(&self) -> RulePlan {
        let selector = self
            .group
            .selector()
            .unwrap_or_else(|_| self.group.path_selector());
        self.rules.plan(&selector)
    }

    fn destroy_group(&self) {
        match self.group.destroy() {
            Ok(()) => self.audit.log(AuditEvent::GroupRemoved {
                path: self.group.path().display().to_string(),
            }),
            // Live members keep the group busy; the next run reuses it
            Err(e) => warn!("{}", e),
        }
    }

    fn fatal(&self, err: OrchestratorError) -> OrchestratorError {
        self.audit.log(AuditEvent::FatalError {
            error: err.to_string(),
        });
        err
    }
}

/// Run the packet classifier on its own until shutdown.
pub async fn run_capture<S, R>(
    classifier: PacketClassifier<S, R>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<ClassifierStats, OrchestratorError>
where
    S: PacketSource + 'static,
    R: RouteSink + 'static,
{
    let (task_shutdown_tx, task_shutdown_rx) = watch::channel(false);
    let mut handle = tokio::spawn(async move {
        let mut classifier = classifier;
        classifier.run(task_shutdown_rx).await
    });

    let joined = tokio::select! {
        joined = &mut handle => joined,
        _ = wait_for_shutdown(&mut shutdown_rx) => {
            let _ = task_shutdown_tx.send(true);
            match tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    handle.abort();
                    return Err(OrchestratorError::Task {
                        name: "packet classifier".to_string(),
                        message: "did not stop in time".to_string(),
                    });
                }
            }
        }
    };

    match joined {
        Ok(result) => Ok(result?),
        Err(e) => Err(OrchestratorError::Task {
            name: "packet classifier".to_string(),
            message: e.to_string(),
        }),
    }
}

async fn serve_status(
    addr: SocketAddr,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<(), OrchestratorError> {
    let server = StatusServer::bind(addr, shutdown_rx).await?;
    server.run().await?;
    Ok(())
}

/// Error for a task that ended while the run was still supposed to be going.
fn task_failure(joined: Result<TaskOutcome, JoinError>) -> OrchestratorError {
    match joined {
        Ok((_, Err(e))) => e,
        Ok((name, Ok(()))) => OrchestratorError::Task {
            name: name.to_string(),
            message: "exited before shutdown".to_string(),
        },
        Err(e) => OrchestratorError::Task {
            name: "background task".to_string(),
            message: e.to_string(),
        },
    }
}

/// Resolve once shutdown is requested or the sender is gone.
async fn wait_for_shutdown(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

async fn join_all(tasks: &mut JoinSet<TaskOutcome>) {
    let joined = tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, async {
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok((name, Ok(()))) => debug!("{} stopped", name),
                Ok((name, Err(e))) => warn!("{} failed while stopping: {}", name, e),
                Err(e) => warn!("Task ended abnormally: {}", e),
            }
        }
    })
    .await;

    if joined.is_err() {
        warn!(
            "{} task(s) did not stop within {:?}, aborting",
            tasks.len(),
            SHUTDOWN_JOIN_TIMEOUT
        );
        tasks.abort_all();
    }
}
