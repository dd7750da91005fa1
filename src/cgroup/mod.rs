//! Kernel traffic-classification group (cgroup v2).
//!
//! Processes written into the group's `cgroup.procs` have their sockets
//! tagged with the group, which is what the NAT rules in
//! [`crate::redirect`] match on. Children forked later inherit the group.

pub mod error;
pub mod group;

pub use error::CgroupError;
pub use group::{CGROUP2_MOUNT, ClassificationGroup, GroupSelector, PROCS_FILE, hierarchy_available};
