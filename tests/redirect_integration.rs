use procredirect::cgroup::{ClassificationGroup, PROCS_FILE};
use procredirect::command::{CommandError, CommandOutput, CommandRunner, SystemRunner, args};
use procredirect::config::{Backend, CaptureSettings, RunSettings};
use procredirect::orchestrator::Orchestrator;
use procredirect::process::ProcfsTable;
use procredirect::redirect::{IptablesBackend, NftablesBackend, RuleManager};
use procredirect::telemetry::AuditLogger;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::{oneshot, watch};

/// In-memory `iptables -t nat` OUTPUT chain.
#[derive(Default)]
struct FakeIptables {
    chain: Mutex<Vec<Vec<String>>>,
}

impl FakeIptables {
    fn seeded(rules: Vec<Vec<String>>) -> Self {
        Self {
            chain: Mutex::new(rules),
        }
    }

    fn chain(&self) -> Vec<Vec<String>> {
        self.chain.lock().unwrap().clone()
    }
}

impl CommandRunner for FakeIptables {
    fn run(
        &self,
        program: &str,
        args: &[String],
        _stdin: Option<&str>,
    ) -> Result<CommandOutput, CommandError> {
        assert_eq!(program, "iptables");
        let op = args[2].as_str();
        let mut spec = args.to_vec();
        spec.remove(2);

        let mut chain = self.chain.lock().unwrap();
        let position = chain.iter().position(|r| *r == spec);
        Ok(match (op, position) {
            ("-A", _) => {
                chain.push(spec);
                CommandOutput::ok("")
            }
            ("-C", Some(_)) => CommandOutput::ok(""),
            ("-D", Some(pos)) => {
                chain.remove(pos);
                CommandOutput::ok("")
            }
            _ => CommandOutput::failed(1, "iptables: Bad rule"),
        })
    }
}

fn unrelated_rule() -> Vec<String> {
    ["-t", "nat", "OUTPUT", "-p", "tcp", "--dport", "25", "-j", "REDIRECT"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn write_proc(root: &Path, pid: u32, argv: &[&str]) {
    let dir = root.join(pid.to_string());
    fs::create_dir_all(&dir).unwrap();
    let mut cmdline = Vec::new();
    for arg in argv {
        cmdline.extend_from_slice(arg.as_bytes());
        cmdline.push(0);
    }
    fs::write(dir.join("cmdline"), cmdline).unwrap();
}

fn settings(cgroup_root: &Path) -> RunSettings {
    RunSettings {
        proxy: "127.0.0.1:12345".parse().unwrap(),
        cgroup_path: cgroup_root.join("procredirect"),
        backend: Backend::Iptables,
        nft_table: "procredirect".to_string(),
        processes: vec!["discord".to_string(), "brave".to_string()],
        poll_interval: Duration::from_millis(10),
        status_listen: None,
        capture: CaptureSettings::default(),
    }
}

fn orchestrator(cgroup_root: &Path, proc_root: &Path, iptables: Arc<FakeIptables>) -> Orchestrator {
    let settings = settings(cgroup_root);
    let group = ClassificationGroup::with_mount_root(&settings.cgroup_path, cgroup_root);
    let rules = RuleManager::new(Arc::new(IptablesBackend::new(iptables)), settings.proxy);
    Orchestrator::new(
        settings,
        group,
        rules,
        Arc::new(ProcfsTable::with_root(proc_root)),
        Arc::new(AuditLogger::new_null()),
    )
}

#[tokio::test]
async fn test_full_run_against_fake_host() {
    let cgroup_root = tempdir().unwrap();
    let proc_root = tempdir().unwrap();
    write_proc(proc_root.path(), 200, &["/opt/discord/Discord", "--type=renderer"]);
    write_proc(proc_root.path(), 201, &["/usr/bin/brave"]);
    write_proc(proc_root.path(), 300, &["/bin/bash"]);

    // The kernel provides cgroup.procs in a real group
    let group_dir = cgroup_root.path().join("procredirect");
    fs::create_dir(&group_dir).unwrap();
    fs::write(group_dir.join(PROCS_FILE), "").unwrap();

    let iptables = Arc::new(FakeIptables::seeded(vec![unrelated_rule()]));
    let orch = orchestrator(cgroup_root.path(), proc_root.path(), iptables.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (ready_tx, ready_rx) = oneshot::channel();
    let handle = tokio::spawn(orch.run(shutdown_rx, Some(ready_tx)));

    ready_rx.await.unwrap();
    let chain = iptables.chain();
    assert_eq!(chain.len(), 4);
    assert!(chain[1..].iter().all(|r| r.join(" ").contains("-m cgroup --path procredirect")));

    let procs = group_dir.join(PROCS_FILE);
    for _ in 0..200 {
        if fs::read_to_string(&procs).unwrap().lines().count() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    shutdown_tx.send(true).unwrap();
    let summary = handle.await.unwrap().unwrap();

    let mut written: Vec<String> = fs::read_to_string(&procs)
        .unwrap()
        .lines()
        .map(String::from)
        .collect();
    written.sort();
    assert_eq!(written, vec!["200", "201"]);
    assert_eq!(summary.members, 2);
    assert_eq!(iptables.chain(), vec![unrelated_rule()]);
}

#[tokio::test]
async fn test_cleanup_after_crash_restores_chain() {
    let cgroup_root = tempdir().unwrap();
    let proc_root = tempdir().unwrap();
    let iptables = Arc::new(FakeIptables::seeded(vec![unrelated_rule()]));

    // Simulate a run killed before teardown
    let orch = orchestrator(cgroup_root.path(), proc_root.path(), iptables.clone());
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let (ready_tx, ready_rx) = oneshot::channel();
    let handle = tokio::spawn(orch.run(shutdown_rx, Some(ready_tx)));
    ready_rx.await.unwrap();
    handle.abort();
    let _ = handle.await;
    assert_eq!(iptables.chain().len(), 4);

    let orch = orchestrator(cgroup_root.path(), proc_root.path(), iptables.clone());
    assert_eq!(orch.cleanup().unwrap(), 3);
    assert_eq!(iptables.chain(), vec![unrelated_rule()]);
    assert!(!cgroup_root.path().join("procredirect").exists());

    // Nothing left to remove the second time
    let orch = orchestrator(cgroup_root.path(), proc_root.path(), iptables.clone());
    assert_eq!(orch.cleanup().unwrap(), 0);
}

#[test]
fn test_rules_plan_lists_iptables_commands() {
    let cgroup_root = tempdir().unwrap();
    let proc_root = tempdir().unwrap();
    let iptables = Arc::new(FakeIptables::default());
    let orch = orchestrator(cgroup_root.path(), proc_root.path(), iptables.clone());

    let plan = orch.plan();

    assert_eq!(plan.backend, "iptables");
    assert_eq!(
        plan.install[2],
        "iptables -t nat -A OUTPUT -m cgroup --path procredirect -p udp ! -d 127.0.0.1 \
         --dport 53 -j DNAT --to-destination 127.0.0.1:12345"
    );
    assert!(iptables.chain().is_empty());
}

#[test]
#[ignore = "requires root and a cgroup v2 hierarchy"]
fn test_real_group_lifecycle() {
    let group = ClassificationGroup::new("/sys/fs/cgroup/procredirect-itest");

    group.create().unwrap();
    let selector = group.selector().unwrap();
    assert_eq!(selector.relative_path, "procredirect-itest");
    assert_eq!(selector.level, 1);
    assert_ne!(selector.inode, 0);
    assert!(group.path().join(PROCS_FILE).exists());

    group.destroy().unwrap();
    assert!(!group.path().exists());
}

#[test]
#[ignore = "requires root, nft and a cgroup v2 hierarchy"]
fn test_real_nftables_install_and_remove() {
    let group = ClassificationGroup::new("/sys/fs/cgroup/procredirect-nft-itest");
    group.create().unwrap();
    let selector = group.selector().unwrap();

    let runner = Arc::new(SystemRunner);
    let backend = Arc::new(NftablesBackend::new(runner.clone(), "procredirect_itest"));
    let rules = RuleManager::new(backend, "127.0.0.1:12345".parse().unwrap());
    let list = args(&["list", "table", "ip", "procredirect_itest"]);

    let installed = rules.install(&selector);
    let listed = runner.run("nft", &list, None);
    let removed = rules.remove(&selector);
    let after = runner.run("nft", &list, None).unwrap();
    group.destroy().unwrap();

    assert_eq!(installed.unwrap(), 3);
    let listed = listed.unwrap();
    assert!(listed.success, "{}", listed.stderr);
    assert!(listed.stdout.contains("socket cgroupv2 level 1"));
    assert!(listed.stdout.contains("comment \"procredirect:udp:53\""));
    assert_eq!(removed.unwrap(), 3);
    assert!(!after.success);
}
