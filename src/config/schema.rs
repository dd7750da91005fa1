//! Configuration file schema.
//!
//! Every scalar is optional so that a file only overrides what it names.
//! Built-in defaults are applied when the merged configuration is resolved
//! into [`RunSettings`](super::RunSettings).

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Transparent proxy endpoint.
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Classification group location.
    #[serde(default)]
    pub cgroup: CgroupConfig,

    /// Firewall backend selection.
    #[serde(default)]
    pub redirect: RedirectConfig,

    /// Processes to watch.
    #[serde(default)]
    pub watch: WatchConfig,

    /// Status endpoint.
    #[serde(default)]
    pub status: StatusConfig,

    /// Virtual interface used by `capture`.
    #[serde(default)]
    pub capture: CaptureConfig,
}

impl Config {
    /// Merge another config into this one.
    ///
    /// Scalars set in `other` win. `watch.processes` is appended without
    /// duplicates. `capture.routes` is replaced when set.
    pub fn merge(&mut self, other: Config) {
        self.general.merge(other.general);
        self.proxy.merge(other.proxy);
        self.cgroup.merge(other.cgroup);
        self.redirect.merge(other.redirect);
        self.watch.merge(other.watch);
        self.status.merge(other.status);
        self.capture.merge(other.capture);
    }
}

/// Firewall tooling used to install the redirection rules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Legacy `iptables`, matching the group by path.
    #[default]
    Iptables,
    /// `nft`, matching the group by identity.
    Nftables,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Iptables => write!(f, "iptables"),
            Backend::Nftables => write!(f, "nftables"),
        }
    }
}

/// General application settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct GeneralConfig {
    /// Log level used when neither `-v` nor `RUST_LOG` is given.
    #[serde(default)]
    pub log_level: Option<String>,
}

impl GeneralConfig {
    fn merge(&mut self, other: GeneralConfig) {
        if other.log_level.is_some() {
            self.log_level = other.log_level;
        }
    }
}

/// Where redirected traffic is sent.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ProxyConfig {
    /// Proxy IPv4 address.
    #[serde(default)]
    pub address: Option<Ipv4Addr>,

    /// Proxy port.
    #[serde(default)]
    pub port: Option<u16>,
}

impl ProxyConfig {
    fn merge(&mut self, other: ProxyConfig) {
        if other.address.is_some() {
            self.address = other.address;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
    }
}

/// Classification group settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct CgroupConfig {
    /// Absolute path of the group directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl CgroupConfig {
    fn merge(&mut self, other: CgroupConfig) {
        if other.path.is_some() {
            self.path = other.path;
        }
    }
}

/// Redirection backend settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RedirectConfig {
    /// Backend to use.
    #[serde(default)]
    pub backend: Option<Backend>,

    /// Name of the nftables table owned by this program.
    #[serde(default)]
    pub table: Option<String>,
}

impl RedirectConfig {
    fn merge(&mut self, other: RedirectConfig) {
        if other.backend.is_some() {
            self.backend = other.backend;
        }
        if other.table.is_some() {
            self.table = other.table;
        }
    }
}

/// Process discovery settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct WatchConfig {
    /// Names matched against process command lines.
    #[serde(default)]
    pub processes: Vec<String>,

    /// Locator polling interval in milliseconds.
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
}

impl WatchConfig {
    fn merge(&mut self, other: WatchConfig) {
        for name in other.processes {
            if !self.processes.contains(&name) {
                self.processes.push(name);
            }
        }
        if other.poll_interval_ms.is_some() {
            self.poll_interval_ms = other.poll_interval_ms;
        }
    }
}

/// Status endpoint settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct StatusConfig {
    /// Serve `/ping` while running.
    #[serde(default)]
    pub enabled: Option<bool>,

    /// Listen address.
    #[serde(default)]
    pub listen: Option<SocketAddr>,
}

impl StatusConfig {
    fn merge(&mut self, other: StatusConfig) {
        if other.enabled.is_some() {
            self.enabled = other.enabled;
        }
        if other.listen.is_some() {
            self.listen = other.listen;
        }
    }
}

/// Virtual interface settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct CaptureConfig {
    /// Interface name.
    #[serde(default)]
    pub interface: Option<String>,

    /// Interface IPv4 address.
    #[serde(default)]
    pub address: Option<Ipv4Addr>,

    /// Prefix length of the interface network.
    #[serde(default)]
    pub prefix_len: Option<u8>,

    /// Interface MTU; also the classifier's read buffer size.
    #[serde(default)]
    pub mtu: Option<u16>,

    /// Destinations routed through the interface.
    #[serde(default)]
    pub routes: Option<Vec<String>>,
}

impl CaptureConfig {
    fn merge(&mut self, other: CaptureConfig) {
        if other.interface.is_some() {
            self.interface = other.interface;
        }
        if other.address.is_some() {
            self.address = other.address;
        }
        if other.prefix_len.is_some() {
            self.prefix_len = other.prefix_len;
        }
        if other.mtu.is_some() {
            self.mtu = other.mtu;
        }
        if other.routes.is_some() {
            self.routes = other.routes;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_empty() {
        let config = Config::default();

        assert!(config.general.log_level.is_none());
        assert!(config.proxy.port.is_none());
        assert!(config.redirect.backend.is_none());
        assert!(config.watch.processes.is_empty());
        assert!(config.capture.routes.is_none());
    }

    #[test]
    fn test_config_merge_scalars() {
        let mut base = Config {
            proxy: ProxyConfig {
                address: Some(Ipv4Addr::LOCALHOST),
                port: Some(12345),
            },
            ..Default::default()
        };
        let override_config = Config {
            proxy: ProxyConfig {
                address: None,
                port: Some(8080),
            },
            redirect: RedirectConfig {
                backend: Some(Backend::Nftables),
                table: None,
            },
            ..Default::default()
        };

        base.merge(override_config);

        assert_eq!(base.proxy.address, Some(Ipv4Addr::LOCALHOST));
        assert_eq!(base.proxy.port, Some(8080));
        assert_eq!(base.redirect.backend, Some(Backend::Nftables));
    }

    #[test]
    fn test_config_merge_processes_appends_without_duplicates() {
        let mut base = Config {
            watch: WatchConfig {
                processes: vec!["discord".to_string()],
                poll_interval_ms: Some(1000),
            },
            ..Default::default()
        };
        let override_config = Config {
            watch: WatchConfig {
                processes: vec!["brave".to_string(), "discord".to_string()],
                poll_interval_ms: None,
            },
            ..Default::default()
        };

        base.merge(override_config);

        assert_eq!(base.watch.processes, vec!["discord", "brave"]);
        assert_eq!(base.watch.poll_interval_ms, Some(1000));
    }

    #[test]
    fn test_config_merge_routes_replaces() {
        let mut base = Config {
            capture: CaptureConfig {
                routes: Some(vec!["0.0.0.0/1".into(), "128.0.0.0/1".into()]),
                ..Default::default()
            },
            ..Default::default()
        };
        base.merge(Config {
            capture: CaptureConfig {
                routes: Some(vec!["10.8.0.0/16".into()]),
                ..Default::default()
            },
            ..Default::default()
        });

        assert_eq!(base.capture.routes, Some(vec!["10.8.0.0/16".to_string()]));
    }

    #[test]
    fn test_config_deserialize() {
        let toml_str = r#"
            [proxy]
            address = "127.0.0.1"
            port = 9040

            [redirect]
            backend = "nftables"

            [watch]
            processes = ["firefox"]

            [status]
            listen = "0.0.0.0:8000"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();

        assert_eq!(config.proxy.address, Some(Ipv4Addr::new(127, 0, 0, 1)));
        assert_eq!(config.proxy.port, Some(9040));
        assert_eq!(config.redirect.backend, Some(Backend::Nftables));
        assert_eq!(config.watch.processes, vec!["firefox"]);
        assert_eq!(config.status.listen, Some("0.0.0.0:8000".parse().unwrap()));
        assert!(config.cgroup.path.is_none());
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let result: Result<Config, _> = toml::from_str("[redirect]\nbackend = \"pf\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_default_toml_parses() {
        // Verify that the shipped default config parses correctly
        let toml_content = include_str!("../../config/default.toml");
        let config: Config = toml::from_str(toml_content).expect("default.toml should parse as Config");

        assert_eq!(config.general.log_level.as_deref(), Some("info"));
        assert_eq!(config.proxy.address, Some(Ipv4Addr::LOCALHOST));
        assert_eq!(config.proxy.port, Some(12345));
        assert_eq!(config.cgroup.path, Some(PathBuf::from("/sys/fs/cgroup/procredirect")));
        assert_eq!(config.redirect.backend, Some(Backend::Iptables));
        assert_eq!(config.watch.processes, vec!["discord", "brave"]);
        assert_eq!(config.status.enabled, Some(true));
        assert_eq!(config.capture.mtu, Some(1500));
        assert_eq!(
            config.capture.routes,
            Some(vec!["0.0.0.0/1".to_string(), "128.0.0.0/1".to_string()])
        );
    }
}
