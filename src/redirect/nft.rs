//! `nft` backend.
//!
//! Rules match `socket cgroupv2` at the group's depth against the group
//! path, which nft resolves to the group id when the rule is loaded.
//! Everything lives in a dedicated `ip` table with one nat chain hooked on
//! `output`:
//!
//! ```text
//! table ip procredirect {
//!     chain output {
//!         type nat hook output priority -100; policy accept;
//!         socket cgroupv2 level 1 "procredirect" ip daddr != 127.0.0.1 tcp dport 80 \
//!             dnat to 127.0.0.1:12345 comment "procredirect:tcp:80"
//!     }
//! }
//! ```
//!
//! Documents are built with the `nftables` schema types and fed to
//! `nft -j -f -`. Rules are found again through their comment tag, since
//! deletion needs the kernel-assigned handle.

use super::backend::RuleBackend;
use super::error::{RedirectError, RedirectResult};
use super::rule::RedirectRule;
use crate::cgroup::GroupSelector;
use crate::command::{CommandError, CommandRunner, args, render};
use nftables::{
    batch::Batch,
    expr::{Expression, NamedExpression, Payload, PayloadField},
    schema::{Chain, NfCmd, NfListObject, NfObject, Nftables, Rule, Table},
    stmt::{Match, NAT, Operator, Statement},
    types::{NfChainPolicy, NfChainType, NfFamily, NfHook},
};
use serde_json::{Value, json};
use std::borrow::Cow;
use std::sync::Arc;
use tracing::{debug, info};

const NFT: &str = "nft";

/// Chain holding the redirection rules.
pub const CHAIN: &str = "output";

/// Address family of the owned table, as nft spells it on the command line.
const FAMILY: &str = "ip";

/// Priority of the nat output hook (`dstnat`).
const NAT_PRIORITY: i32 = -100;

/// Where the expression list of the rule sits in a one-rule document.
const RULE_EXPR_POINTER: &str = "/nftables/0/add/rule/expr";

/// Identity-matching backend driving the `nft` binary.
pub struct NftablesBackend {
    runner: Arc<dyn CommandRunner>,
    table: String,
}

/// The parts of a listed rule needed to find and delete it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ListedRule {
    chain: String,
    handle: u32,
    comment: Option<String>,
}

impl NftablesBackend {
    /// Create a backend owning table `ip <table>`.
    pub fn new(runner: Arc<dyn CommandRunner>, table: impl Into<String>) -> Self {
        Self {
            runner,
            table: table.into(),
        }
    }

    /// Name of the owned table.
    pub fn table(&self) -> &str {
        &self.table
    }

    fn table_object(&self) -> Table<'static> {
        Table {
            family: NfFamily::IP,
            name: Cow::Owned(self.table.clone()),
            handle: None,
        }
    }

    /// Document creating the table and chain. `add` is a no-op for existing objects.
    pub fn prepare_document(&self) -> RedirectResult<Value> {
        let mut batch = Batch::new();
        batch.add(NfListObject::Table(self.table_object()));
        batch.add(NfListObject::Chain(Chain {
            family: NfFamily::IP,
            table: Cow::Owned(self.table.clone()),
            name: Cow::Borrowed(CHAIN),
            newname: None,
            handle: None,
            _type: Some(NfChainType::NAT),
            hook: Some(NfHook::Output),
            prio: Some(NAT_PRIORITY),
            dev: None,
            policy: Some(NfChainPolicy::Accept),
        }));
        encode(&batch.to_nftables())
    }

    /// Document adding `rule` for the members of `group`.
    pub fn rule_document(&self, group: &GroupSelector, rule: &RedirectRule) -> RedirectResult<Value> {
        let mut batch = Batch::new();
        batch.add(NfListObject::Rule(Rule {
            family: NfFamily::IP,
            table: Cow::Owned(self.table.clone()),
            chain: Cow::Borrowed(CHAIN),
            handle: None,
            index: None,
            comment: Some(Cow::Owned(rule.tag())),
            expr: Cow::Owned(vec![
                payload_match(
                    "ip",
                    "daddr",
                    Operator::NEQ,
                    Expression::String(Cow::Owned(rule.exclude_dst.to_string())),
                ),
                payload_match(
                    rule.protocol.as_str(),
                    "dport",
                    Operator::EQ,
                    Expression::Number(u32::from(rule.dport)),
                ),
                Statement::DNAT(Some(NAT {
                    addr: Some(Expression::String(Cow::Owned(rule.target.ip().to_string()))),
                    family: None,
                    port: Some(Expression::Number(u32::from(rule.target.port()))),
                    flags: None,
                })),
            ]),
        }));

        let mut document = encode(&batch.to_nftables())?;
        document
            .pointer_mut(RULE_EXPR_POINTER)
            .and_then(Value::as_array_mut)
            .ok_or_else(|| RedirectError::Encode("rule document has no expression list".to_string()))?
            .insert(0, cgroup_match(group));
        Ok(document)
    }

    fn delete_rule_document(&self, handle: u32) -> RedirectResult<Value> {
        let mut batch = Batch::new();
        batch.add_cmd(NfCmd::Delete(NfListObject::Rule(Rule {
            family: NfFamily::IP,
            table: Cow::Owned(self.table.clone()),
            chain: Cow::Borrowed(CHAIN),
            handle: Some(handle),
            index: None,
            comment: None,
            expr: Cow::Owned(Vec::new()),
        })));
        encode(&batch.to_nftables())
    }

    fn delete_table_document(&self) -> RedirectResult<Value> {
        let mut batch = Batch::new();
        batch.add_cmd(NfCmd::Delete(NfListObject::Table(self.table_object())));
        encode(&batch.to_nftables())
    }

    fn submit(&self, document: &Value) -> RedirectResult<()> {
        self.runner
            .run_checked(NFT, &args(&["-j", "-f", "-"]), Some(&document.to_string()))?;
        Ok(())
    }

    /// Rules in the owned table, or `None` when the table does not exist.
    fn list_rules(&self) -> RedirectResult<Option<Vec<ListedRule>>> {
        let list_args = args(&["-j", "list", "table", FAMILY, &self.table]);
        let output = self.runner.run(NFT, &list_args, None)?;

        if !output.success {
            if output.stderr.contains("No such file or directory") {
                return Ok(None);
            }
            return Err(CommandError::Failed {
                cmd: render(NFT, &list_args),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            }
            .into());
        }

        parse_rules(&output.stdout).map(Some)
    }

    fn find_handle(&self, rule: &RedirectRule) -> RedirectResult<Option<u32>> {
        let tag = rule.tag();
        Ok(self.list_rules()?.and_then(|rules| {
            rules
                .into_iter()
                .find(|r| r.chain == CHAIN && r.comment.as_deref() == Some(tag.as_str()))
                .map(|r| r.handle)
        }))
    }

    fn render_submit(document: RedirectResult<Value>) -> String {
        match document {
            Ok(document) => format!("{} -j -f - <<< '{}'", NFT, document),
            Err(e) => format!("# {}", e),
        }
    }
}

fn encode(ruleset: &Nftables) -> RedirectResult<Value> {
    serde_json::to_value(ruleset).map_err(|e| RedirectError::Encode(e.to_string()))
}

fn payload_match(
    protocol: &'static str,
    field: &'static str,
    op: Operator,
    right: Expression<'static>,
) -> Statement<'static> {
    Statement::Match(Match {
        left: Expression::Named(NamedExpression::Payload(Payload::PayloadField(PayloadField {
            protocol: Cow::Borrowed(protocol),
            field: Cow::Borrowed(field),
        }))),
        right,
        op,
    })
}

/// `socket cgroupv2 level <n> "<path>"`. The schema types have no socket
/// key for cgroupv2, so this one is written as raw JSON.
fn cgroup_match(group: &GroupSelector) -> Value {
    json!({ "match": {
        "op": "==",
        "left": { "socket": { "key": "cgroupv2", "level": group.level } },
        "right": group.relative_path
    } })
}

/// Extract the rule objects from `nft -j list` output.
fn parse_rules(stdout: &str) -> RedirectResult<Vec<ListedRule>> {
    let mut listing: Value =
        serde_json::from_str(stdout).map_err(|e| RedirectError::Parse(e.to_string()))?;

    // Only chain, handle and comment are read. Rule bodies can hold
    // expressions the schema types do not model, so they are dropped first.
    if let Some(objects) = listing.get_mut("nftables").and_then(Value::as_array_mut) {
        for rule in objects
            .iter_mut()
            .filter_map(|obj| obj.get_mut("rule"))
            .filter_map(Value::as_object_mut)
        {
            rule.insert("expr".to_string(), Value::Array(Vec::new()));
        }
    }

    let ruleset: Nftables =
        serde_json::from_value(listing).map_err(|e| RedirectError::Parse(e.to_string()))?;

    Ok(ruleset
        .objects
        .iter()
        .filter_map(|obj| match obj {
            NfObject::ListObject(NfListObject::Rule(rule)) => Some(ListedRule {
                chain: rule.chain.to_string(),
                handle: rule.handle?,
                comment: rule.comment.as_ref().map(|c| c.to_string()),
            }),
            _ => None,
        })
        .collect())
}

impl RuleBackend for NftablesBackend {
    fn name(&self) -> &'static str {
        "nftables"
    }

    fn prepare(&self, _group: &GroupSelector) -> RedirectResult<()> {
        self.submit(&self.prepare_document()?)?;
        debug!("nftables: table ip {} chain {} ready", self.table, CHAIN);
        Ok(())
    }

    fn apply(&self, group: &GroupSelector, rule: &RedirectRule) -> RedirectResult<()> {
        self.submit(&self.rule_document(group, rule)?)?;
        debug!("nftables: added {} ({})", rule, rule.tag());
        Ok(())
    }

    fn is_present(&self, _group: &GroupSelector, rule: &RedirectRule) -> RedirectResult<bool> {
        Ok(self.find_handle(rule)?.is_some())
    }

    fn delete(&self, _group: &GroupSelector, rule: &RedirectRule) -> RedirectResult<()> {
        match self.find_handle(rule)? {
            Some(handle) => {
                self.submit(&self.delete_rule_document(handle)?)?;
                debug!("nftables: deleted {} (handle {})", rule, handle);
            }
            None => debug!("nftables: {} already absent", rule),
        }
        Ok(())
    }

    fn finish(&self, _group: &GroupSelector) -> RedirectResult<()> {
        match self.list_rules()? {
            None => Ok(()),
            Some(rules) if rules.is_empty() => {
                self.submit(&self.delete_table_document()?)?;
                info!("nftables: removed table ip {}", self.table);
                Ok(())
            }
            Some(rules) => {
                debug!(
                    "nftables: leaving table ip {} in place, {} rule(s) remain",
                    self.table,
                    rules.len()
                );
                Ok(())
            }
        }
    }

    fn render_install(&self, group: &GroupSelector, rules: &[RedirectRule]) -> Vec<String> {
        std::iter::once(Self::render_submit(self.prepare_document()))
            .chain(
                rules
                    .iter()
                    .map(|r| Self::render_submit(self.rule_document(group, r))),
            )
            .collect()
    }

    fn render_remove(&self, _group: &GroupSelector, rules: &[RedirectRule]) -> Vec<String> {
        let mut lines = vec![render(
            NFT,
            &args(&["-j", "list", "table", FAMILY, &self.table]),
        )];
        lines.extend(rules.iter().map(|r| {
            format!(
                "{} delete rule {} {} {} handle <handle of \"{}\">",
                NFT,
                FAMILY,
                self.table,
                CHAIN,
                r.tag()
            )
        }));
        lines.push(format!("{} delete table {} {}", NFT, FAMILY, self.table));
        lines
    }
}
