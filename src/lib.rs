//! procredirect: redirect the traffic of selected applications into a local
//! transparent proxy.
//!
//! Processes whose command line matches a configured name are placed in a
//! dedicated cgroup v2 group. NAT rules scoped to that group rewrite their
//! outbound HTTP, HTTPS and DNS flows to the proxy endpoint. Children inherit
//! the group, so a whole application tree is covered once its first process
//! is found. Traffic from every other process is untouched.
//!
//! # Architecture
//!
//! - **Process**: polls `/proc` for each watched name and emits match batches
//! - **Reconcile**: writes newly matched PIDs into the group exactly once
//! - **Cgroup**: creates, joins and removes the classification group
//! - **Redirect**: installs and removes the rule set (iptables or nftables)
//! - **Packet**: optional TUN capture that decodes IPv4 headers
//! - **Status**: `GET /ping` liveness endpoint
//! - **Config**: layered TOML configuration resolved into run settings
//! - **Telemetry**: structured syslog audit events
//! - **Orchestrator**: ordered startup and teardown of all of the above

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod cgroup;
pub mod cli;
pub mod cli_handler;
pub mod command;
pub mod config;
pub mod orchestrator;
pub mod packet;
pub mod process;
pub mod reconcile;
pub mod redirect;
pub mod status;
pub mod telemetry;
