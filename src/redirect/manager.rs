//! Install and withdraw the redirection rule set as a unit.

use super::backend::RuleBackend;
use super::error::{RedirectError, RedirectResult};
use super::iptables::IptablesBackend;
use super::nft::NftablesBackend;
use super::rule::{RedirectRule, rule_set};
use crate::cgroup::GroupSelector;
use crate::command::CommandRunner;
use crate::config::Backend;
use std::net::SocketAddrV4;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Build the backend selected in configuration.
pub fn backend_for(
    kind: Backend,
    nft_table: &str,
    runner: Arc<dyn CommandRunner>,
) -> Arc<dyn RuleBackend> {
    match kind {
        Backend::Iptables => Arc::new(IptablesBackend::new(runner)),
        Backend::Nftables => Arc::new(NftablesBackend::new(runner, nft_table)),
    }
}

/// Rendered commands for a dry run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulePlan {
    /// Backend the commands belong to.
    pub backend: &'static str,
    /// Commands run by [`RuleManager::install`].
    pub install: Vec<String>,
    /// Commands run by [`RuleManager::remove`].
    pub remove: Vec<String>,
}

/// Owns the three redirection rules for one proxy target.
pub struct RuleManager {
    backend: Arc<dyn RuleBackend>,
    rules: Vec<RedirectRule>,
}

impl RuleManager {
    /// Manage the rules redirecting to `target` through `backend`.
    pub fn new(backend: Arc<dyn RuleBackend>, target: SocketAddrV4) -> Self {
        Self {
            backend,
            rules: rule_set(target),
        }
    }

    /// Name of the backend in use.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Rules this manager is responsible for.
    pub fn rules(&self) -> &[RedirectRule] {
        &self.rules
    }

    /// Install every rule or none.
    ///
    /// When a rule fails, the rules applied before it are deleted again in
    /// reverse order and `RuleInstallFailed` names the failing rule.
    pub fn install(&self, group: &GroupSelector) -> RedirectResult<usize> {
        let backend = self.backend.name();

        if let Err(e) = self.backend.prepare(group) {
            return Err(RedirectError::RuleInstallFailed {
                rule: format!("{} setup", backend),
                source: Box::new(e),
            });
        }

        let mut applied: Vec<&RedirectRule> = Vec::with_capacity(self.rules.len());
        for rule in &self.rules {
            match self.backend.apply(group, rule) {
                Ok(()) => applied.push(rule),
                Err(e) => {
                    warn!("{}: failed to install {}: {}", backend, rule, e);
                    self.roll_back(group, &applied);
                    return Err(RedirectError::RuleInstallFailed {
                        rule: rule.to_string(),
                        source: Box::new(e),
                    });
                }
            }
        }

        info!(
            "{}: installed {} redirection rules for group {}",
            backend,
            applied.len(),
            group.relative_path
        );
        Ok(applied.len())
    }

    fn roll_back(&self, group: &GroupSelector, applied: &[&RedirectRule]) {
        for rule in applied.iter().rev() {
            match self.backend.delete(group, rule) {
                Ok(()) => debug!("Rolled back {}", rule),
                Err(e) => warn!("Failed to roll back {}: {}", rule, e),
            }
        }
        if let Err(e) = self.backend.finish(group) {
            warn!("Cleanup after rollback failed: {}", e);
        }
    }

    /// Remove every rule that is present.
    ///
    /// Absent rules are skipped. Every rule is attempted even after a
    /// failure; the collected failures come back as `RuleRemoveFailed`.
    pub fn remove(&self, group: &GroupSelector) -> RedirectResult<usize> {
        let backend = self.backend.name();
        let mut removed = 0;
        let mut failures = Vec::new();

        for rule in &self.rules {
            match self.backend.is_present(group, rule) {
                Ok(true) => match self.backend.delete(group, rule) {
                    Ok(()) => removed += 1,
                    Err(e) => failures.push(format!("{}: {}", rule, e)),
                },
                Ok(false) => debug!("{}: {} not installed, skipping", backend, rule),
                Err(e) => failures.push(format!("{}: {}", rule, e)),
            }
        }

        if let Err(e) = self.backend.finish(group) {
            failures.push(format!("{} cleanup: {}", backend, e));
        }

        if failures.is_empty() {
            info!("{}: removed {} redirection rules", backend, removed);
            Ok(removed)
        } else {
            Err(RedirectError::RuleRemoveFailed { failures })
        }
    }

    /// Commands install and remove would run, without running them.
    pub fn plan(&self, group: &GroupSelector) -> RulePlan {
        RulePlan {
            backend: self.backend.name(),
            install: self.backend.render_install(group, &self.rules),
            remove: self.backend.render_remove(group, &self.rules),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::testing::ScriptedRunner;
    use std::sync::Mutex;

    /// In-memory rule table with an optional failure on the n-th apply.
    #[derive(Default)]
    struct FakeBackend {
        installed: Mutex<Vec<RedirectRule>>,
        applies: Mutex<usize>,
        fail_on_apply: Option<usize>,
        fail_delete: bool,
        finished: Mutex<usize>,
    }

    impl FakeBackend {
        fn failing_on(n: usize) -> Self {
            Self {
                fail_on_apply: Some(n),
                ..Default::default()
            }
        }

        fn installed(&self) -> Vec<RedirectRule> {
            self.installed.lock().unwrap().clone()
        }
    }

    fn refused() -> RedirectError {
        RedirectError::Parse("refused".to_string())
    }

    impl RuleBackend for FakeBackend {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn apply(&self, _group: &GroupSelector, rule: &RedirectRule) -> RedirectResult<()> {
            let mut applies = self.applies.lock().unwrap();
            *applies += 1;
            if self.fail_on_apply == Some(*applies) {
                return Err(refused());
            }
            self.installed.lock().unwrap().push(*rule);
            Ok(())
        }

        fn is_present(&self, _group: &GroupSelector, rule: &RedirectRule) -> RedirectResult<bool> {
            Ok(self.installed.lock().unwrap().contains(rule))
        }

        fn delete(&self, _group: &GroupSelector, rule: &RedirectRule) -> RedirectResult<()> {
            if self.fail_delete {
                return Err(refused());
            }
            let mut installed = self.installed.lock().unwrap();
            if let Some(pos) = installed.iter().position(|r| r == rule) {
                installed.remove(pos);
            }
            Ok(())
        }

        fn finish(&self, _group: &GroupSelector) -> RedirectResult<()> {
            *self.finished.lock().unwrap() += 1;
            Ok(())
        }

        fn render_install(&self, _group: &GroupSelector, rules: &[RedirectRule]) -> Vec<String> {
            rules.iter().map(|r| format!("add {}", r)).collect()
        }

        fn render_remove(&self, _group: &GroupSelector, rules: &[RedirectRule]) -> Vec<String> {
            rules.iter().map(|r| format!("del {}", r)).collect()
        }
    }

    fn group() -> GroupSelector {
        GroupSelector {
            relative_path: "procredirect".to_string(),
            inode: 99,
            level: 1,
        }
    }

    fn target() -> SocketAddrV4 {
        "127.0.0.1:12345".parse().unwrap()
    }

    #[test]
    fn test_install_then_remove_restores_table() {
        let backend = Arc::new(FakeBackend::default());
        let unrelated = rule_set("10.9.9.9:1".parse().unwrap())[0];
        backend.installed.lock().unwrap().push(unrelated);
        let before = backend.installed();

        let manager = RuleManager::new(backend.clone(), target());
        assert_eq!(manager.install(&group()).unwrap(), 3);
        assert_eq!(backend.installed().len(), 4);

        assert_eq!(manager.remove(&group()).unwrap(), 3);
        assert_eq!(backend.installed(), before);
    }

    #[test]
    fn test_failure_on_second_rule_leaves_nothing_installed() {
        let backend = Arc::new(FakeBackend::failing_on(2));
        let manager = RuleManager::new(backend.clone(), target());

        let err = manager.install(&group()).unwrap_err();

        match err {
            RedirectError::RuleInstallFailed { rule, .. } => {
                assert_eq!(rule, "tcp/443 -> 127.0.0.1:12345");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(backend.installed().is_empty());
        assert_eq!(*backend.finished.lock().unwrap(), 1);
    }

    #[test]
    fn test_remove_tolerates_absent_rules() {
        let backend = Arc::new(FakeBackend::default());
        let manager = RuleManager::new(backend.clone(), target());

        assert_eq!(manager.remove(&group()).unwrap(), 0);

        // Partially installed state from an earlier crash
        backend.installed.lock().unwrap().push(manager.rules()[2]);
        assert_eq!(manager.remove(&group()).unwrap(), 1);
        assert!(backend.installed().is_empty());
    }

    #[test]
    fn test_remove_attempts_every_rule_and_reports_failures() {
        let backend = Arc::new(FakeBackend {
            fail_delete: true,
            ..Default::default()
        });
        let manager = RuleManager::new(backend.clone(), target());
        backend
            .installed
            .lock()
            .unwrap()
            .extend(manager.rules().iter().copied());

        let err = manager.remove(&group()).unwrap_err();

        assert!(!err.is_fatal());
        match err {
            RedirectError::RuleRemoveFailed { failures } => assert_eq!(failures.len(), 3),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(*backend.finished.lock().unwrap(), 1);
    }

    #[test]
    fn test_plan_renders_without_applying() {
        let backend = Arc::new(FakeBackend::default());
        let manager = RuleManager::new(backend.clone(), target());

        let plan = manager.plan(&group());

        assert_eq!(plan.backend, "fake");
        assert_eq!(plan.install.len(), 3);
        assert_eq!(plan.remove[0], "del tcp/80 -> 127.0.0.1:12345");
        assert!(backend.installed().is_empty());
    }

    #[test]
    fn test_backend_for_selects_implementation() {
        let runner = Arc::new(ScriptedRunner::succeeding());
        assert_eq!(backend_for(Backend::Iptables, "t", runner.clone()).name(), "iptables");
        assert_eq!(backend_for(Backend::Nftables, "t", runner).name(), "nftables");
    }
}
