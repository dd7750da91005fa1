//! Keeps discovered processes and classification membership in step.
//!
//! The loop is idle until a [`MatchBatch`] arrives, then writes every PID it
//! has not classified yet. A PID is recorded in the [`MembershipSet`] only
//! after its write succeeds; a failed write leaves it absent so the next
//! batch that reports it tries again. The locators' polling provides the
//! retry cadence.

use crate::cgroup::{CgroupError, ClassificationGroup};
use crate::process::MatchBatch;
use crate::telemetry::{AuditEvent, AuditLogger};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Destination of membership writes.
pub trait MembershipWriter: Send + Sync {
    /// Put `pid` into the classification group.
    fn add_member(&self, pid: u32) -> Result<(), CgroupError>;
}

impl MembershipWriter for ClassificationGroup {
    fn add_member(&self, pid: u32) -> Result<(), CgroupError> {
        ClassificationGroup::add_member(self, pid)
    }
}

/// PIDs already written during this run.
#[derive(Debug, Default)]
pub struct MembershipSet {
    pids: Mutex<HashSet<u32>>,
}

impl MembershipSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `pid` has been classified.
    pub fn contains(&self, pid: u32) -> bool {
        self.lock().contains(&pid)
    }

    /// Number of classified PIDs.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing has been classified yet.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<u32>> {
        self.pids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Result of applying one batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// PIDs written in this batch.
    pub added: Vec<u32>,
    /// PIDs whose write failed.
    pub failed: Vec<u32>,
    /// PIDs skipped because they were already members.
    pub skipped: usize,
}

/// Consumes locator batches and drives membership writes.
pub struct ReconciliationLoop {
    writer: Arc<dyn MembershipWriter>,
    members: Arc<MembershipSet>,
    audit: Arc<AuditLogger>,
}

impl ReconciliationLoop {
    /// Create a loop writing through `writer`.
    pub fn new(writer: Arc<dyn MembershipWriter>, audit: Arc<AuditLogger>) -> Self {
        Self {
            writer,
            members: Arc::new(MembershipSet::new()),
            audit,
        }
    }

    /// Shared view of the membership set.
    pub fn members(&self) -> Arc<MembershipSet> {
        self.members.clone()
    }

    /// Apply one batch.
    ///
    /// The set stays locked across check, write and insert so a PID is never
    /// written twice even if batches for overlapping names are applied from
    /// several tasks.
    pub fn apply_batch(&self, batch: &MatchBatch) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let mut members = self.members.lock();

        for found in batch.matches() {
            if members.contains(&found.pid) {
                outcome.skipped += 1;
                continue;
            }

            match self.writer.add_member(found.pid) {
                Ok(()) => {
                    members.insert(found.pid);
                    info!(
                        "Added process {} with PID {} to classification group",
                        found.process_name, found.pid
                    );
                    self.audit.log(AuditEvent::MemberAdded {
                        process: found.process_name,
                        pid: found.pid,
                    });
                    outcome.added.push(found.pid);
                }
                Err(e) => {
                    // A vanished process is the usual cause; it will be retried if re-reported
                    warn!("Failed to classify PID {} ({}): {}", found.pid, found.process_name, e);
                    self.audit.log(AuditEvent::MemberAddFailed {
                        process: found.process_name,
                        pid: found.pid,
                        error: e.to_string(),
                    });
                    outcome.failed.push(found.pid);
                }
            }
        }

        outcome
    }

    /// Apply batches until shutdown or until every sender is gone.
    pub async fn run(self, mut batch_rx: mpsc::Receiver<MatchBatch>, mut shutdown_rx: watch::Receiver<bool>) {
        debug!("Reconciliation loop started");

        loop {
            tokio::select! {
                batch = batch_rx.recv() => {
                    match batch {
                        Some(batch) => {
                            let outcome = self.apply_batch(&batch);
                            if !outcome.added.is_empty() || !outcome.failed.is_empty() {
                                debug!(
                                    "Batch for '{}': {} added, {} failed, {} already classified",
                                    batch.process_name,
                                    outcome.added.len(),
                                    outcome.failed.len(),
                                    outcome.skipped
                                );
                            }
                        }
                        None => {
                            debug!("All locators stopped, reconciliation loop exiting");
                            break;
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!("Reconciliation loop received shutdown signal");
                        break;
                    }
                }
            }
        }

        info!(
            "Reconciliation loop stopped with {} classified processes",
            self.members.len()
        );
    }
}
