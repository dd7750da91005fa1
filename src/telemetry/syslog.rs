//! Syslog integration for audit logging.

use std::sync::Mutex;

use syslog::{Facility, Formatter3164};
use tracing::{debug, error, warn};

use super::error::TelemetryError;
use super::events::AuditEvent;

/// Syslog tag for all audit events.
pub const SYSLOG_TAG: &str = "PROCREDIRECT";

/// Audit logger that writes structured JSON events to syslog.
///
/// Uses interior mutability so it can be shared behind an `Arc` by every task.
pub struct AuditLogger {
    /// None indicates a null logger.
    writer: Option<Mutex<syslog::Logger<syslog::LoggerBackend, Formatter3164>>>,
}

impl AuditLogger {
    /// Create a new audit logger connected to the local syslog socket.
    pub fn new() -> Result<Self, TelemetryError> {
        let formatter = Formatter3164 {
            facility: Facility::LOG_DAEMON,
            hostname: None,
            process: SYSLOG_TAG.to_string(),
            pid: std::process::id(),
        };

        let writer = syslog::unix(formatter)
            .map_err(|e| TelemetryError::SyslogConnection(e.to_string()))?;

        debug!("Connected to syslog with tag '{}'", SYSLOG_TAG);
        Ok(Self {
            writer: Some(Mutex::new(writer)),
        })
    }

    /// Connect to syslog, falling back to a null logger if that fails.
    pub fn connect_or_null() -> Self {
        match Self::new() {
            Ok(logger) => logger,
            Err(e) => {
                warn!("Audit events disabled: {}", e);
                Self::new_null()
            }
        }
    }

    /// Create a null audit logger that discards all events.
    pub fn new_null() -> Self {
        Self { writer: None }
    }

    /// Log an audit event to syslog.
    pub fn log(&self, event: AuditEvent) {
        let Some(ref writer) = self.writer else {
            return;
        };

        let json = match serde_json::to_string(&event.with_timestamp()) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize audit event: {}", e);
                return;
            }
        };

        match writer.lock() {
            Ok(mut writer) => {
                if let Err(e) = writer.info(&json) {
                    error!("Failed to write to syslog: {}", e);
                }
            }
            Err(e) => {
                error!("Failed to acquire syslog writer lock: {}", e);
            }
        }
        debug!("Logged audit event: {}", json);
    }

    /// Check if this is a null logger.
    pub fn is_null(&self) -> bool {
        self.writer.is_none()
    }
}
