//! Process discovery error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from querying the process table.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The process table could not be listed.
    #[error("Failed to read process table at {path}: {source}")]
    TableUnavailable {
        /// Root of the process table.
        path: PathBuf,
        /// The underlying procfs error.
        #[source]
        source: procfs::ProcError,
    },

    /// The search pattern is empty.
    #[error("Process name pattern must not be empty")]
    EmptyPattern,
}

/// Result type for process discovery.
pub type ProcessResult<T> = Result<T, ProcessError>;
