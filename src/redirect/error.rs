//! Redirection error types.

use crate::command::CommandError;
use thiserror::Error;

/// Errors from installing or removing redirection rules.
#[derive(Debug, Error)]
pub enum RedirectError {
    /// A firewall tool could not be run or exited unsuccessfully.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// One rule failed to install. Rules installed before it were rolled back.
    #[error("Failed to install redirection rule {rule}: {source}")]
    RuleInstallFailed {
        /// The rule that failed.
        rule: String,
        /// Why it failed.
        #[source]
        source: Box<RedirectError>,
    },

    /// Some rules could not be removed.
    #[error("Failed to remove {} redirection rule(s): {}", failures.len(), failures.join("; "))]
    RuleRemoveFailed {
        /// One entry per failed rule or cleanup step.
        failures: Vec<String>,
    },

    /// A firewall document could not be serialized.
    #[error("Failed to encode firewall document: {0}")]
    Encode(String),

    /// Firewall tool output could not be understood.
    #[error("Failed to parse firewall output: {0}")]
    Parse(String),
}

impl RedirectError {
    /// Whether this error must abort the run.
    ///
    /// Removal failures are only reported.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RedirectError::RuleRemoveFailed { .. })
    }
}

/// Result type for redirection operations.
pub type RedirectResult<T> = Result<T, RedirectError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_failures_are_not_fatal() {
        let err = RedirectError::RuleRemoveFailed {
            failures: vec!["tcp/80: busy".to_string(), "udp/53: busy".to_string()],
        };
        assert!(!err.is_fatal());
        assert_eq!(
            err.to_string(),
            "Failed to remove 2 redirection rule(s): tcp/80: busy; udp/53: busy"
        );
    }

    #[test]
    fn test_install_failure_is_fatal() {
        let err = RedirectError::RuleInstallFailed {
            rule: "tcp/443".to_string(),
            source: Box::new(RedirectError::Parse("bad".to_string())),
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("tcp/443"));
    }
}
