//! Discovery of processes to classify.
//!
//! - [`table`]: "which PIDs have a command line containing X" over procfs
//! - [`locator`]: per-name polling loop feeding a bounded channel

pub mod error;
pub mod locator;
pub mod table;

pub use error::{ProcessError, ProcessResult};
pub use locator::{DEFAULT_POLL_INTERVAL, MatchBatch, ProcessLocator, ProcessMatch};
pub use table::{ProcessTable, ProcfsTable};
