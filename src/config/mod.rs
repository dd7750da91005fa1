//! Configuration system for procredirect.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. System config: `/etc/procredirect/config.toml`
//! 2. User config: `~/.config/procredirect/config.toml`
//! 3. Additional config file (via `--config` flag)
//! 4. CLI flags (highest priority)
//!
//! Missing system and user files are skipped. Anything left unset falls back
//! to the built-in defaults when the result is resolved into [`RunSettings`].
//!
//! # Merge Behavior
//!
//! - **Scalars** (port, backend, poll interval) are **overridden**
//! - **`watch.processes`** is **merged** (appended, duplicates dropped)
//! - **`capture.routes`** is **replaced** as a whole
//!
//! ```toml
//! [proxy]
//! address = "127.0.0.1"
//! port = 12345
//!
//! [watch]
//! processes = ["discord", "brave"]
//! ```

mod error;
mod loader;
mod schema;
mod settings;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{
    Backend, CaptureConfig, CgroupConfig, Config, GeneralConfig, ProxyConfig, RedirectConfig,
    StatusConfig, WatchConfig,
};
pub use settings::{
    CaptureSettings, DEFAULT_CGROUP_PATH, DEFAULT_NFT_TABLE, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_PROXY, DEFAULT_STATUS_LISTEN, RunSettings,
};
