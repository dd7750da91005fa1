//! Firewall redirection of the classification group's traffic.
//!
//! [`RuleManager`] owns the lifecycle: it installs the three rules from
//! [`rule_set`] all-or-nothing and removes them tolerating absent ones.
//! The firewall syntax sits behind [`RuleBackend`], with one implementation
//! per tool:
//!
//! - [`IptablesBackend`] matches the group by path (`-m cgroup --path`)
//! - [`NftablesBackend`] matches the group by path through `socket cgroupv2`
//!
//! Both only shell out through a [`CommandRunner`](crate::command::CommandRunner).

mod backend;
mod error;
mod iptables;
mod manager;
mod nft;
mod rule;

pub use backend::RuleBackend;
pub use error::{RedirectError, RedirectResult};
pub use iptables::IptablesBackend;
pub use manager::{RuleManager, RulePlan, backend_for};
pub use nft::NftablesBackend;
pub use rule::{Protocol, REDIRECTED_FLOWS, RULE_TAG_PREFIX, RedirectRule, rule_set};
