//! Audit event types for structured logging.
//!
//! Each variant is one state change of the redirection control plane. Events
//! are serialized as flat JSON objects with an `event` tag and a `ts` field.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Control-plane audit events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Daemon started.
    SessionStart {
        /// Process ID of the daemon.
        pid: u32,
        /// Names being watched.
        processes: Vec<String>,
        /// Redirection backend in use.
        backend: String,
        /// Proxy endpoint traffic is redirected to.
        proxy: String,
    },

    /// Daemon stopped.
    SessionEnd {
        /// Seconds since start.
        duration_sec: u64,
        /// Distinct PIDs classified during the run.
        members: usize,
    },

    /// Classification group created (or reused).
    GroupCreated {
        /// Group path.
        path: String,
        /// Group inode.
        inode: u64,
    },

    /// Classification group removed.
    GroupRemoved {
        /// Group path.
        path: String,
    },

    /// All redirection rules installed.
    RulesInstalled {
        /// Backend that installed them.
        backend: String,
        /// Number of rules.
        count: usize,
    },

    /// Redirection rules removed.
    RulesRemoved {
        /// Backend that removed them.
        backend: String,
        /// Rules that were present and removed.
        removed: usize,
        /// Rules that could not be removed.
        failed: usize,
    },

    /// A PID was written into the classification group.
    MemberAdded {
        /// Configured name it matched.
        process: String,
        /// Process ID.
        pid: u32,
    },

    /// Writing a PID into the classification group failed.
    MemberAddFailed {
        /// Configured name it matched.
        process: String,
        /// Process ID.
        pid: u32,
        /// Error description.
        error: String,
    },

    /// A fatal error ended the run.
    FatalError {
        /// Error description.
        error: String,
    },
}

/// Wrapper for serializing events with timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct TimestampedEvent<'a> {
    /// ISO8601 timestamp.
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,

    /// The actual event (flattened into this struct).
    #[serde(flatten)]
    pub event: &'a AuditEvent,
}

impl AuditEvent {
    /// Wrap this event with a timestamp for serialization.
    pub fn with_timestamp(&self) -> TimestampedEvent<'_> {
        TimestampedEvent {
            timestamp: Utc::now(),
            event: self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_start_serialization() {
        let event = AuditEvent::SessionStart {
            pid: 12345,
            processes: vec!["discord".to_string(), "brave".to_string()],
            backend: "iptables".to_string(),
            proxy: "127.0.0.1:12345".to_string(),
        };

        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"session_start\""));
        assert!(json.contains("\"pid\":12345"));
        assert!(json.contains("\"processes\":[\"discord\",\"brave\"]"));
        assert!(json.contains("\"backend\":\"iptables\""));
        assert!(json.contains("\"ts\""));
    }

    #[test]
    fn test_member_added_serialization() {
        let event = AuditEvent::MemberAdded {
            process: "discord".to_string(),
            pid: 100,
        };

        let json = serde_json::to_string(&event.with_timestamp()).unwrap();
        assert!(json.contains("\"event\":\"member_added\""));
        assert!(json.contains("\"process\":\"discord\""));
        assert!(json.contains("\"pid\":100"));
    }

    #[test]
    fn test_rules_removed_serialization() {
        let event = AuditEvent::RulesRemoved {
            backend: "nftables".to_string(),
            removed: 3,
            failed: 0,
        };

        let value: serde_json::Value =
            serde_json::to_value(event.with_timestamp()).unwrap();
        assert_eq!(value["event"], "rules_removed");
        assert_eq!(value["removed"], 3);
        assert_eq!(value["failed"], 0);
    }

    #[test]
    fn test_timestamp_is_iso8601() {
        let event = AuditEvent::FatalError {
            error: "boom".to_string(),
        };
        let value: serde_json::Value =
            serde_json::to_value(event.with_timestamp()).unwrap();
        let ts = value["ts"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
    }
}
