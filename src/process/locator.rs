//! Polling discovery of processes by name.
//!
//! One [`ProcessLocator`] runs per configured name. Every tick it re-queries
//! the process table, so children spawned after the first match are picked
//! up on the next tick, and sends the full list of current PIDs as one
//! [`MatchBatch`]. A failed or empty query sends nothing and is retried on
//! the next tick.
//!
//! # Example
//!
//! ```ignore
//! use procredirect::process::{ProcessLocator, ProcfsTable};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio::sync::{mpsc, watch};
//!
//! let (tx, mut rx) = mpsc::channel(1);
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let locator = ProcessLocator::new("discord", Arc::new(ProcfsTable::new()), Duration::from_secs(1));
//! tokio::spawn(locator.run(tx, shutdown_rx));
//!
//! while let Some(batch) = rx.recv().await {
//!     println!("{}: {:?}", batch.process_name, batch.pids);
//! }
//! ```

use super::table::ProcessTable;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

/// Default polling cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A single discovered process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessMatch {
    /// Configured name the process matched.
    pub process_name: String,
    /// Process ID.
    pub pid: u32,
}

/// All PIDs matching one name on one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchBatch {
    /// Configured name that was searched for.
    pub process_name: String,
    /// Matching PIDs.
    pub pids: Vec<u32>,
}

impl MatchBatch {
    /// Create a batch.
    pub fn new(process_name: impl Into<String>, pids: Vec<u32>) -> Self {
        Self {
            process_name: process_name.into(),
            pids,
        }
    }

    /// Iterate over the batch as individual matches.
    pub fn matches(&self) -> impl Iterator<Item = ProcessMatch> + '_ {
        self.pids.iter().map(|pid| ProcessMatch {
            process_name: self.process_name.clone(),
            pid: *pid,
        })
    }
}

/// Re-queries the process table for one name on a fixed interval.
pub struct ProcessLocator {
    process_name: String,
    table: Arc<dyn ProcessTable>,
    poll_interval: Duration,
}

impl ProcessLocator {
    /// Create a locator for `process_name`.
    pub fn new(
        process_name: impl Into<String>,
        table: Arc<dyn ProcessTable>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            process_name: process_name.into(),
            table,
            poll_interval,
        }
    }

    /// Name this locator searches for.
    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    /// Query once. Failures count as "no matches".
    pub fn poll_once(&self) -> Vec<u32> {
        match self.table.find(&self.process_name) {
            Ok(pids) => pids,
            Err(e) => {
                trace!("Process lookup for '{}' failed: {}", self.process_name, e);
                Vec::new()
            }
        }
    }

    /// Poll until shutdown is signalled or the receiver is dropped.
    pub async fn run(self, batch_tx: mpsc::Sender<MatchBatch>, mut shutdown_rx: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(
            "Locator for '{}' started (every {:?})",
            self.process_name, self.poll_interval
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let pids = self.poll_once();
                    if pids.is_empty() {
                        continue;
                    }
                    let batch = MatchBatch::new(self.process_name.clone(), pids);
                    tokio::select! {
                        sent = batch_tx.send(batch) => {
                            if sent.is_err() {
                                debug!("Locator for '{}': receiver dropped, shutting down", self.process_name);
                                break;
                            }
                        }
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                break;
                            }
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        debug!("Locator for '{}' stopped", self.process_name);
    }
}
