//! Process table queries.
//!
//! Walks procfs with the `procfs` crate and reports the PIDs whose command
//! line (argv joined with spaces) contains a substring, the same match
//! `pgrep -f` performs. Processes that exit mid-scan are skipped silently.

use super::error::{ProcessError, ProcessResult};
use procfs::process::{Process, all_processes_with_root};
use std::path::PathBuf;
use tracing::trace;

/// Lookup of running processes by command line.
pub trait ProcessTable: Send + Sync {
    /// PIDs whose command line contains `pattern`, in ascending order.
    fn find(&self, pattern: &str) -> ProcessResult<Vec<u32>>;
}

/// [`ProcessTable`] backed by procfs.
#[derive(Debug, Clone)]
pub struct ProcfsTable {
    root: PathBuf,
    exclude_pid: Option<u32>,
}

impl ProcfsTable {
    /// Table over `/proc` that never reports the current process.
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("/proc"),
            exclude_pid: Some(std::process::id()),
        }
    }

    /// Table over an arbitrary procfs-like directory (for testing).
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            exclude_pid: None,
        }
    }

    /// Never report `pid`.
    pub fn excluding(mut self, pid: u32) -> Self {
        self.exclude_pid = Some(pid);
        self
    }
}

/// Command line of `process`, or `None` for kernel threads, zombies and
/// processes that are already gone.
fn cmdline(process: &Process) -> Option<String> {
    let argv = process.cmdline().ok()?;
    if argv.is_empty() {
        return None;
    }
    Some(argv.join(" "))
}

impl Default for ProcfsTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for ProcfsTable {
    fn find(&self, pattern: &str) -> ProcessResult<Vec<u32>> {
        if pattern.is_empty() {
            return Err(ProcessError::EmptyPattern);
        }

        let processes =
            all_processes_with_root(&self.root).map_err(|e| ProcessError::TableUnavailable {
                path: self.root.clone(),
                source: e,
            })?;

        let mut pids: Vec<u32> = processes
            .flatten()
            .filter_map(|process| {
                let pid = u32::try_from(process.pid()).ok()?;
                if Some(pid) == self.exclude_pid {
                    return None;
                }
                cmdline(&process)
                    .is_some_and(|cmdline| cmdline.contains(pattern))
                    .then_some(pid)
            })
            .collect();

        pids.sort_unstable();
        trace!("Pattern '{}' matched {} processes", pattern, pids.len());
        Ok(pids)
    }
}
