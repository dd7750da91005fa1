//! Audit logging for procredirect.
//!
//! Control-plane state changes (group created, rules installed, PIDs
//! classified, rules removed) are written to syslog as JSON under the
//! `PROCREDIRECT` tag. Diagnostic logging is separate and goes through
//! `tracing` to stderr.
//!
//! ```json
//! {"ts":"2026-01-07T14:32:01Z","event":"member_added","process":"discord","pid":4182}
//! ```

mod error;
mod events;
mod syslog;

pub use error::TelemetryError;
pub use events::{AuditEvent, TimestampedEvent};
pub use syslog::{AuditLogger, SYSLOG_TAG};
