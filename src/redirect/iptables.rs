//! Legacy `iptables` backend.
//!
//! Rules live in the `nat` table's `OUTPUT` chain and select the group by
//! its path with the `cgroup` match:
//!
//! ```text
//! iptables -t nat -A OUTPUT -m cgroup --path procredirect -p tcp ! -d 127.0.0.1 \
//!     --dport 80 -j DNAT --to-destination 127.0.0.1:12345
//! ```
//!
//! Presence is checked with `-C`, which exits 1 when no identical rule exists.

use super::backend::RuleBackend;
use super::error::RedirectResult;
use super::rule::RedirectRule;
use crate::cgroup::GroupSelector;
use crate::command::{CommandError, CommandRunner, render};
use std::sync::Arc;
use tracing::debug;

const IPTABLES: &str = "iptables";

/// Exit status of `iptables -C` for a rule that does not exist.
const CHECK_ABSENT_EXIT: i32 = 1;

/// Path-matching backend driving the `iptables` binary.
pub struct IptablesBackend {
    runner: Arc<dyn CommandRunner>,
}

impl IptablesBackend {
    /// Create a backend executing through `runner`.
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Arguments for `op` (`-A`, `-C` or `-D`) on `rule`.
    pub fn rule_args(op: &str, group: &GroupSelector, rule: &RedirectRule) -> Vec<String> {
        vec![
            "-t".to_string(),
            "nat".to_string(),
            op.to_string(),
            "OUTPUT".to_string(),
            "-m".to_string(),
            "cgroup".to_string(),
            "--path".to_string(),
            group.relative_path.clone(),
            "-p".to_string(),
            rule.protocol.as_str().to_string(),
            "!".to_string(),
            "-d".to_string(),
            rule.exclude_dst.to_string(),
            "--dport".to_string(),
            rule.dport.to_string(),
            "-j".to_string(),
            "DNAT".to_string(),
            "--to-destination".to_string(),
            rule.target.to_string(),
        ]
    }
}

impl RuleBackend for IptablesBackend {
    fn name(&self) -> &'static str {
        "iptables"
    }

    fn apply(&self, group: &GroupSelector, rule: &RedirectRule) -> RedirectResult<()> {
        self.runner
            .run_checked(IPTABLES, &Self::rule_args("-A", group, rule), None)?;
        debug!("iptables: appended {}", rule);
        Ok(())
    }

    fn is_present(&self, group: &GroupSelector, rule: &RedirectRule) -> RedirectResult<bool> {
        let args = Self::rule_args("-C", group, rule);
        let output = self.runner.run(IPTABLES, &args, None)?;

        if output.success {
            Ok(true)
        } else if output.code == Some(CHECK_ABSENT_EXIT) {
            Ok(false)
        } else {
            Err(CommandError::Failed {
                cmd: render(IPTABLES, &args),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            }
            .into())
        }
    }

    fn delete(&self, group: &GroupSelector, rule: &RedirectRule) -> RedirectResult<()> {
        self.runner
            .run_checked(IPTABLES, &Self::rule_args("-D", group, rule), None)?;
        debug!("iptables: deleted {}", rule);
        Ok(())
    }

    fn render_install(&self, group: &GroupSelector, rules: &[RedirectRule]) -> Vec<String> {
        rules
            .iter()
            .map(|r| render(IPTABLES, &Self::rule_args("-A", group, r)))
            .collect()
    }

    fn render_remove(&self, group: &GroupSelector, rules: &[RedirectRule]) -> Vec<String> {
        rules
            .iter()
            .map(|r| render(IPTABLES, &Self::rule_args("-D", group, r)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use crate::command::testing::ScriptedRunner;
    use crate::redirect::RedirectError;
    use crate::redirect::rule::rule_set;

    fn group() -> GroupSelector {
        GroupSelector {
            relative_path: "procredirect".to_string(),
            inode: 4242,
            level: 1,
        }
    }

    fn http_rule() -> RedirectRule {
        rule_set("127.0.0.1:12345".parse().unwrap())[0]
    }

    #[test]
    fn test_apply_renders_dnat_rule() {
        let runner = Arc::new(ScriptedRunner::succeeding());
        let backend = IptablesBackend::new(runner.clone());

        backend.apply(&group(), &http_rule()).unwrap();

        assert_eq!(
            runner.commands(),
            vec![
                "iptables -t nat -A OUTPUT -m cgroup --path procredirect -p tcp ! -d 127.0.0.1 \
                 --dport 80 -j DNAT --to-destination 127.0.0.1:12345"
            ]
        );
    }

    #[test]
    fn test_is_present_maps_exit_codes() {
        let runner = Arc::new(ScriptedRunner::new(|_, args, _| {
            let port = |p: &str| args.iter().any(|a| a == p);
            if port("443") {
                CommandOutput::ok("")
            } else if port("80") {
                CommandOutput::failed(1, "iptables: Bad rule (does a matching rule exist in that chain?).")
            } else {
                CommandOutput::failed(2, "iptables v1.8.9: Couldn't load match `cgroup'")
            }
        }));
        let backend = IptablesBackend::new(runner);
        let rules = rule_set("127.0.0.1:12345".parse().unwrap());

        assert!(!backend.is_present(&group(), &rules[0]).unwrap());
        assert!(backend.is_present(&group(), &rules[1]).unwrap());
        assert!(matches!(
            backend.is_present(&group(), &rules[2]),
            Err(RedirectError::Command(CommandError::Failed { code: Some(2), .. }))
        ));
    }

    #[test]
    fn test_failed_apply_is_command_error() {
        let runner = Arc::new(ScriptedRunner::new(|_, _, _| {
            CommandOutput::failed(4, "Permission denied (you must be root)")
        }));
        let backend = IptablesBackend::new(runner);

        let err = backend.apply(&group(), &http_rule()).unwrap_err();
        assert!(err.to_string().contains("Permission denied"));
    }

    #[test]
    fn test_render_remove_uses_delete() {
        let backend = IptablesBackend::new(Arc::new(ScriptedRunner::succeeding()));
        let rules = rule_set("127.0.0.1:12345".parse().unwrap());

        let lines = backend.render_remove(&group(), &rules);
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|l| l.starts_with("iptables -t nat -D OUTPUT")));
        assert!(lines[2].contains("-p udp ! -d 127.0.0.1 --dport 53"));
    }
}
