//! Resolved runtime settings.
//!
//! [`RunSettings`] is the merged [`Config`] with defaults applied and every
//! value checked. Components receive the parts they need at construction.

use super::error::ConfigError;
use super::schema::{Backend, CaptureConfig, Config};
use crate::packet::MIN_HEADER_LEN;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

/// Default proxy endpoint.
pub const DEFAULT_PROXY: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 12345);

/// Default classification group.
pub const DEFAULT_CGROUP_PATH: &str = "/sys/fs/cgroup/procredirect";

/// Default nftables table name.
pub const DEFAULT_NFT_TABLE: &str = "procredirect";

/// Default locator polling interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Default status endpoint.
pub const DEFAULT_STATUS_LISTEN: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 12346));

/// Virtual interface parameters for capture mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSettings {
    /// Interface name.
    pub interface: String,
    /// Interface address.
    pub address: Ipv4Addr,
    /// Prefix length of the interface network.
    pub prefix_len: u8,
    /// MTU and read buffer size.
    pub mtu: u16,
    /// Destinations routed via the interface.
    pub routes: Vec<String>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            interface: "procredirect0".to_string(),
            address: Ipv4Addr::new(10, 0, 0, 1),
            prefix_len: 24,
            mtu: 1500,
            routes: vec!["0.0.0.0/1".to_string(), "128.0.0.0/1".to_string()],
        }
    }
}

impl CaptureSettings {
    /// Apply defaults to `config` and check the interface parameters.
    pub fn from_config(config: &CaptureConfig) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let capture = Self {
            interface: config.interface.clone().unwrap_or(defaults.interface),
            address: config.address.unwrap_or(defaults.address),
            prefix_len: config.prefix_len.unwrap_or(defaults.prefix_len),
            mtu: config.mtu.unwrap_or(defaults.mtu),
            routes: config.routes.clone().unwrap_or(defaults.routes),
        };

        if capture.interface.is_empty() {
            return Err(invalid("capture.interface", "must not be empty"));
        }
        if usize::from(capture.mtu) < MIN_HEADER_LEN {
            return Err(invalid(
                "capture.mtu",
                &format!("must be at least {} bytes", MIN_HEADER_LEN),
            ));
        }
        if capture.prefix_len > 32 {
            return Err(invalid("capture.prefix_len", "must be between 0 and 32"));
        }
        Ok(capture)
    }
}

/// Everything the orchestrator and subcommands consume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    /// Redirection target.
    pub proxy: SocketAddrV4,
    /// Classification group directory.
    pub cgroup_path: PathBuf,
    /// Firewall backend.
    pub backend: Backend,
    /// nftables table name.
    pub nft_table: String,
    /// Process names to watch.
    pub processes: Vec<String>,
    /// Locator polling cadence.
    pub poll_interval: Duration,
    /// Status endpoint address, `None` when disabled.
    pub status_listen: Option<SocketAddr>,
    /// Capture interface parameters.
    pub capture: CaptureSettings,
}

impl RunSettings {
    /// Resolve and validate `config` for a redirection run.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Self::resolve(config, true)
    }

    /// Resolve `config` for subcommands that never start locators
    /// (cleanup, rules, capture). An empty process list is accepted.
    pub fn for_maintenance(config: &Config) -> Result<Self, ConfigError> {
        Self::resolve(config, false)
    }

    fn resolve(config: &Config, require_processes: bool) -> Result<Self, ConfigError> {
        let proxy = SocketAddrV4::new(
            config.proxy.address.unwrap_or(*DEFAULT_PROXY.ip()),
            config.proxy.port.unwrap_or(DEFAULT_PROXY.port()),
        );
        if proxy.port() == 0 {
            return Err(invalid("proxy.port", "must be non-zero"));
        }

        let cgroup_path = config
            .cgroup
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CGROUP_PATH));
        if !cgroup_path.is_absolute() {
            return Err(invalid(
                "cgroup.path",
                &format!("{} is not an absolute path", cgroup_path.display()),
            ));
        }

        if require_processes && config.watch.processes.is_empty() {
            return Err(invalid(
                "watch.processes",
                "at least one process name is required (config file or --process)",
            ));
        }
        if config.watch.processes.iter().any(|p| p.trim().is_empty()) {
            return Err(invalid("watch.processes", "process names must not be empty"));
        }

        let poll_interval_ms = config
            .watch
            .poll_interval_ms
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS);
        if poll_interval_ms == 0 {
            return Err(invalid("watch.poll_interval_ms", "must be non-zero"));
        }

        let nft_table = config
            .redirect
            .table
            .clone()
            .unwrap_or_else(|| DEFAULT_NFT_TABLE.to_string());
        if nft_table.is_empty() || nft_table.contains(char::is_whitespace) {
            return Err(invalid("redirect.table", "must be a non-empty name without spaces"));
        }

        let status_listen = if config.status.enabled.unwrap_or(true) {
            Some(config.status.listen.unwrap_or(DEFAULT_STATUS_LISTEN))
        } else {
            None
        };

        let capture = CaptureSettings::from_config(&config.capture)?;

        Ok(Self {
            proxy,
            cgroup_path,
            backend: config.redirect.backend.unwrap_or_default(),
            nft_table,
            processes: config.watch.processes.clone(),
            poll_interval: Duration::from_millis(poll_interval_ms),
            status_listen,
            capture,
        })
    }
}

impl Config {
    /// Check that this configuration resolves to valid [`RunSettings`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        RunSettings::from_config(self).map(|_| ())
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
}
