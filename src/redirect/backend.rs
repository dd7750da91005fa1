//! The seam between rule lifecycle logic and firewall syntax.

use super::error::RedirectResult;
use super::rule::RedirectRule;
use crate::cgroup::GroupSelector;

/// Per-rule operations a firewall backend provides.
///
/// Ordering, rollback and tolerance of absent rules live in
/// [`RuleManager`](super::RuleManager); backends only translate one rule at
/// a time into their tool's syntax.
pub trait RuleBackend: Send + Sync {
    /// Short name for logs and audit events.
    fn name(&self) -> &'static str;

    /// Create whatever containers the rules live in. Called before the first `apply`.
    fn prepare(&self, _group: &GroupSelector) -> RedirectResult<()> {
        Ok(())
    }

    /// Install one rule.
    fn apply(&self, group: &GroupSelector, rule: &RedirectRule) -> RedirectResult<()>;

    /// Whether the rule is currently installed.
    fn is_present(&self, group: &GroupSelector, rule: &RedirectRule) -> RedirectResult<bool>;

    /// Remove one installed rule.
    fn delete(&self, group: &GroupSelector, rule: &RedirectRule) -> RedirectResult<()>;

    /// Tidy up after removal. Called once after every rule has been processed.
    fn finish(&self, _group: &GroupSelector) -> RedirectResult<()> {
        Ok(())
    }

    /// Commands `prepare` and `apply` would run for `rules`, one per line.
    fn render_install(&self, group: &GroupSelector, rules: &[RedirectRule]) -> Vec<String>;

    /// Commands removal would run for `rules`, one per line.
    fn render_remove(&self, group: &GroupSelector, rules: &[RedirectRule]) -> Vec<String>;
}
