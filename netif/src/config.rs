//! Network-interface configuration
//!
//! Typed settings with sensible defaults, optionally overridden from the
//! boot command line as whitespace-separated `key=value` pairs:
//!
//! ```text
//! net.iface=mynet0 net.ip=192.168.1.1 arp.timeout_ms=1000 arp.retransmit_ms=250
//! e1000.reset_polls=10000 e1000.tx_polls=1000000
//! ```

use crate::error::NetError;
use crate::registry::InterfaceName;
use crate::wire::{ip_text_to_u32, u32_to_ip_text};
use log::warn;

/// Name the first attached controller registers under
pub const DEFAULT_INTERFACE: &str = "mynet0";

/// Sender protocol address used when nothing else is configured
pub const DEFAULT_LOCAL_IP: u32 = 0xC0A8_0101; // 192.168.1.1

/// ARP engine settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpConfig {
    /// Upper bound on a whole resolution, in milliseconds
    pub timeout_ms: u64,
    /// Interval between repeated requests while a resolution is pending
    pub retransmit_ms: u64,
}

impl Default for ArpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 1000,
            retransmit_ms: 250,
        }
    }
}

/// e1000 controller settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct E1000Config {
    /// Control-register reads allowed while waiting for reset to clear
    pub reset_poll_limit: u32,
    /// Descriptor-status reads allowed while waiting for transmit completion
    pub tx_poll_limit: u32,
}

impl Default for E1000Config {
    fn default() -> Self {
        Self {
            reset_poll_limit: 10_000,
            tx_poll_limit: 1_000_000,
        }
    }
}

/// Complete network-interface configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetConfig {
    pub interface: InterfaceName,
    pub local_ip: u32,
    pub arp: ArpConfig,
    pub e1000: E1000Config,
}

impl Default for NetConfig {
    fn default() -> Self {
        let mut interface = InterfaceName::new();
        let _ = interface.push_str(DEFAULT_INTERFACE);
        Self {
            interface,
            local_ip: DEFAULT_LOCAL_IP,
            arp: ArpConfig::default(),
            e1000: E1000Config::default(),
        }
    }
}

impl NetConfig {
    /// Apply command-line overrides on top of the defaults.
    pub fn parse(cmdline: &str) -> Result<Self, NetError> {
        let mut config = Self::default();
        for pair in cmdline.split_whitespace() {
            let Some((key, value)) = pair.split_once('=') else {
                // Flags without a value belong to other subsystems
                continue;
            };
            config.apply(key, value)?;
        }
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<(), NetError> {
        match key {
            "net.iface" => {
                self.interface = InterfaceName::try_from(value)
                    .map_err(|_| NetError::InvalidConfig("net.iface longer than 16 bytes"))?;
            }
            "net.ip" => {
                self.local_ip =
                    ip_text_to_u32(value).map_err(|_| NetError::InvalidConfig("net.ip is not IPv4"))?;
            }
            "arp.timeout_ms" => self.arp.timeout_ms = parse_number(value, "arp.timeout_ms")?,
            "arp.retransmit_ms" => self.arp.retransmit_ms = parse_number(value, "arp.retransmit_ms")?,
            "e1000.reset_polls" => {
                self.e1000.reset_poll_limit = parse_number(value, "e1000.reset_polls")?
            }
            "e1000.tx_polls" => self.e1000.tx_poll_limit = parse_number(value, "e1000.tx_polls")?,
            _ if key.starts_with("net.") || key.starts_with("arp.") || key.starts_with("e1000.") => {
                warn!("net: ignoring unknown option {}", key);
            }
            _ => {}
        }
        Ok(())
    }

    /// Reject settings that would make an operation unbounded or unusable.
    pub fn validate(&self) -> Result<(), NetError> {
        if self.interface.is_empty() {
            return Err(NetError::InvalidConfig("interface name is empty"));
        }
        if self.arp.timeout_ms == 0 {
            return Err(NetError::InvalidConfig("arp.timeout_ms must be non-zero"));
        }
        if self.arp.retransmit_ms == 0 {
            return Err(NetError::InvalidConfig("arp.retransmit_ms must be non-zero"));
        }
        if self.e1000.reset_poll_limit == 0 || self.e1000.tx_poll_limit == 0 {
            return Err(NetError::InvalidConfig("poll limits must be non-zero"));
        }
        Ok(())
    }

    pub fn local_ip_text(&self) -> crate::wire::IpText {
        u32_to_ip_text(self.local_ip)
    }
}

fn parse_number<T: core::str::FromStr>(value: &str, key: &'static str) -> Result<T, NetError> {
    value.parse().map_err(|_| NetError::InvalidConfig(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NetConfig::default();
        assert_eq!(config.interface.as_str(), "mynet0");
        assert_eq!(config.local_ip_text().as_str(), "192.168.1.1");
        assert_eq!(config.arp.timeout_ms, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_overrides() {
        let config = NetConfig::parse(
            "console=ttyS0 quiet net.iface=lan0 net.ip=10.0.2.15 arp.timeout_ms=500 e1000.tx_polls=42",
        )
        .unwrap();
        assert_eq!(config.interface.as_str(), "lan0");
        assert_eq!(config.local_ip, 0x0A00_020F);
        assert_eq!(config.arp.timeout_ms, 500);
        assert_eq!(config.arp.retransmit_ms, 250);
        assert_eq!(config.e1000.tx_poll_limit, 42);
        assert_eq!(config.e1000.reset_poll_limit, 10_000);
    }

    #[test]
    fn test_parse_ignores_unknown_keys() {
        let config = NetConfig::parse("net.mtu=9000 video=off").unwrap();
        assert_eq!(config, NetConfig::default());
    }

    #[test]
    fn test_parse_rejects_bad_values() {
        assert_eq!(
            NetConfig::parse("net.ip=192.168.1"),
            Err(NetError::InvalidConfig("net.ip is not IPv4"))
        );
        assert_eq!(
            NetConfig::parse("arp.timeout_ms=soon"),
            Err(NetError::InvalidConfig("arp.timeout_ms"))
        );
        assert!(NetConfig::parse("arp.timeout_ms=0").is_err());
        assert!(NetConfig::parse("net.iface=an-interface-name-too-long").is_err());
    }
}
