//! Classification group error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from managing the classification group.
#[derive(Debug, Error)]
pub enum CgroupError {
    /// The group directory could not be created.
    #[error("Failed to create classification group {path}: {source}")]
    GroupCreationFailed {
        /// Group path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The group does not exist or cannot be inspected.
    #[error("Failed to look up classification group {path}: {source}")]
    GroupLookupFailed {
        /// Group path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Writing a PID into the group's membership list failed.
    #[error("Failed to add PID {pid} to classification group: {source}")]
    MemberWriteFailed {
        /// The PID that could not be added.
        pid: u32,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The group directory could not be removed.
    #[error("Failed to remove classification group {path}: {source}")]
    DestroyFailed {
        /// Group path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl CgroupError {
    /// Whether no valid run is possible after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CgroupError::GroupCreationFailed { .. } | CgroupError::GroupLookupFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn io(kind: std::io::ErrorKind) -> std::io::Error {
        std::io::Error::new(kind, "test")
    }

    #[test]
    fn test_fatality() {
        let path = PathBuf::from("/sys/fs/cgroup/x");
        assert!(CgroupError::GroupCreationFailed {
            path: path.clone(),
            source: io(std::io::ErrorKind::PermissionDenied)
        }
        .is_fatal());
        assert!(CgroupError::GroupLookupFailed {
            path: path.clone(),
            source: io(std::io::ErrorKind::NotFound)
        }
        .is_fatal());
        assert!(!CgroupError::MemberWriteFailed {
            pid: 1,
            source: io(std::io::ErrorKind::NotFound)
        }
        .is_fatal());
        assert!(!CgroupError::DestroyFailed {
            path,
            source: io(std::io::ErrorKind::ResourceBusy)
        }
        .is_fatal());
    }

    #[test]
    fn test_member_write_display() {
        let err = CgroupError::MemberWriteFailed {
            pid: 4242,
            source: io(std::io::ErrorKind::PermissionDenied),
        };
        assert!(err.to_string().contains("4242"));
    }
}
