//! The cgroup v2 directory that tags redirected processes.
//!
//! # Lifecycle
//!
//! 1. [`ClassificationGroup::create`] once at startup (idempotent)
//! 2. [`ClassificationGroup::selector`] to hand its identity to the rule backends
//! 3. [`ClassificationGroup::add_member`] for every discovered PID
//! 4. [`ClassificationGroup::destroy`] at shutdown, best effort
//!
//! The kernel refuses to remove a cgroup that still has live members, so
//! removal commonly fails while the watched applications are running. That
//! leaves an empty directory behind, which the next run simply reuses.

use super::error::CgroupError;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// Mount point of the unified cgroup hierarchy.
pub const CGROUP2_MOUNT: &str = "/sys/fs/cgroup";

/// Membership list file inside a cgroup directory.
pub const PROCS_FILE: &str = "cgroup.procs";

/// How firewall rules refer to the group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSelector {
    /// Path relative to the hierarchy root, as `iptables -m cgroup --path`
    /// and `nft socket cgroupv2` expect.
    pub relative_path: String,
    /// Inode of the group directory, the kernel's id for the group.
    pub inode: u64,
    /// Depth below the hierarchy root.
    pub level: u32,
}

/// Handle to the classification cgroup.
#[derive(Debug)]
pub struct ClassificationGroup {
    path: PathBuf,
    mount_root: PathBuf,
    write_lock: Mutex<()>,
}

impl ClassificationGroup {
    /// Group at `path` under the standard cgroup2 mount.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_mount_root(path, CGROUP2_MOUNT)
    }

    /// Group at `path` under a custom hierarchy root (for testing).
    pub fn with_mount_root(path: impl Into<PathBuf>, mount_root: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mount_root: mount_root.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Absolute path of the group directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ensure the group exists. Succeeds if it already does.
    pub fn create(&self) -> Result<(), CgroupError> {
        fs::create_dir_all(&self.path).map_err(|e| CgroupError::GroupCreationFailed {
            path: self.path.clone(),
            source: e,
        })?;

        if !self.path.is_dir() {
            return Err(CgroupError::GroupCreationFailed {
                path: self.path.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "path exists and is not a directory",
                ),
            });
        }

        info!("Classification group ready at {:?}", self.path);
        Ok(())
    }

    /// Inode of the group directory.
    pub fn identity(&self) -> Result<u64, CgroupError> {
        fs::metadata(&self.path)
            .map(|m| m.ino())
            .map_err(|e| CgroupError::GroupLookupFailed {
                path: self.path.clone(),
                source: e,
            })
    }

    /// Path relative to the hierarchy root, without a leading slash.
    ///
    /// Falls back to the full path when the group lives outside the root.
    pub fn relative_path(&self) -> String {
        match self.path.strip_prefix(&self.mount_root) {
            Ok(rel) => rel.to_string_lossy().trim_matches('/').to_string(),
            Err(_) => self.path.to_string_lossy().to_string(),
        }
    }

    /// Everything a rule backend needs to match traffic from this group.
    pub fn selector(&self) -> Result<GroupSelector, CgroupError> {
        let inode = self.identity()?;
        Ok(GroupSelector {
            inode,
            ..self.path_selector()
        })
    }

    /// Selector with inode 0, for when the group may not exist.
    ///
    /// Good enough for rendering commands and for removal, which finds
    /// rules by path or tag rather than by identity.
    pub fn path_selector(&self) -> GroupSelector {
        let relative_path = self.relative_path();
        let level = relative_path.split('/').filter(|c| !c.is_empty()).count() as u32;

        GroupSelector {
            relative_path,
            inode: 0,
            level,
        }
    }

    /// Append `pid` to the group's membership list.
    ///
    /// Calls are serialized; the file is opened for append without create
    /// so a missing group fails instead of silently writing a regular file.
    pub fn add_member(&self, pid: u32) -> Result<(), CgroupError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let write_err = |e| CgroupError::MemberWriteFailed { pid, source: e };

        let mut procs = OpenOptions::new()
            .append(true)
            .open(self.path.join(PROCS_FILE))
            .map_err(write_err)?;
        procs
            .write_all(format!("{}\n", pid).as_bytes())
            .map_err(write_err)?;

        debug!("Wrote PID {} to {:?}", pid, self.path);
        Ok(())
    }

    /// Remove the group directory. An already absent group is not an error.
    pub fn destroy(&self) -> Result<(), CgroupError> {
        match fs::remove_dir(&self.path) {
            Ok(()) => {
                info!("Removed classification group {:?}", self.path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Classification group {:?} already absent", self.path);
                Ok(())
            }
            Err(e) => Err(CgroupError::DestroyFailed {
                path: self.path.clone(),
                source: e,
            }),
        }
    }
}

/// Whether a cgroup v2 hierarchy is mounted at `root`.
pub fn hierarchy_available(root: &Path) -> bool {
    root.join("cgroup.controllers").exists()
}
