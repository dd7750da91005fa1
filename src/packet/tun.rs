//! Virtual interface setup for packet capture.
//!
//! Creates a TUN device with `tun-rs`, assigns its address, and points the
//! two halves of the IPv4 space (`0.0.0.0/1`, `128.0.0.0/1`) at it with
//! `ip route`, which overrides the default route without replacing it.
//! Routes added here are removed again when the device is dropped.
//!
//! # Requirements
//!
//! - Root or `CAP_NET_ADMIN`
//! - `ip` command available in PATH

use super::classifier::PacketSource;
use super::error::PacketError;
use crate::command::{CommandRunner, args};
use crate::config::CaptureSettings;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tun_rs::DeviceBuilder;

/// A configured TUN interface.
pub struct TunDevice {
    device: tun_rs::AsyncDevice,
    name: String,
    routes: Vec<String>,
    runner: Arc<dyn CommandRunner>,
}

impl TunDevice {
    /// Create, address and route the interface described by `config`.
    pub fn create(
        config: &CaptureSettings,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, PacketError> {
        info!("Creating TUN interface {}", config.interface);

        let device = DeviceBuilder::new()
            .name(&config.interface)
            .ipv4(config.address, config.prefix_len, None)
            .mtu(config.mtu)
            .build_async()
            .map_err(|e| PacketError::Device(format!("Failed to create TUN device: {}", e)))?;

        let name = device
            .name()
            .map_err(|e| PacketError::Device(format!("Failed to get interface name: {}", e)))?;

        let mut tun = Self {
            device,
            name,
            routes: Vec::new(),
            runner,
        };

        tun.ip(&["link", "set", "dev", &tun.name, "up"])?;

        for route in &config.routes {
            let name = tun.name.clone();
            tun.ip(&["route", "add", route, "dev", &name])?;
            tun.routes.push(route.clone());
        }

        info!(
            "Interface {} configured: {}/{} mtu {}, {} routes",
            tun.name,
            config.address,
            config.prefix_len,
            config.mtu,
            tun.routes.len()
        );
        Ok(tun)
    }

    /// Kernel-assigned interface name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn ip(&self, parts: &[&str]) -> Result<(), PacketError> {
        self.runner
            .run_checked("ip", &args(parts), None)
            .map(|_| ())
            .map_err(|e| PacketError::Device(e.to_string()))
    }
}

impl PacketSource for TunDevice {
    async fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.device.recv(buf).await
    }
}

impl Drop for TunDevice {
    fn drop(&mut self) {
        for route in self.routes.drain(..).rev() {
            debug!("Removing route {} via {}", route, self.name);
            if let Err(e) = self
                .runner
                .run_checked("ip", &args(&["route", "del", &route, "dev", &self.name]), None)
            {
                warn!("Failed to remove route {}: {}", route, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::SystemRunner;

    #[test]
    #[ignore = "requires CAP_NET_ADMIN"]
    fn test_create_tun_device() {
        let config = CaptureSettings {
            interface: "prtest0".to_string(),
            routes: Vec::new(),
            ..Default::default()
        };
        let tun = TunDevice::create(&config, Arc::new(SystemRunner)).unwrap();
        assert_eq!(tun.name(), "prtest0");
    }
}
