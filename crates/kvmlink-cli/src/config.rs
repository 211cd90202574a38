//! Configuration system for the kvmlink relay daemon.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use kvmlink_relay::{PortBands, RelayManagerConfig};

/// kvmlink daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Relay port bands and timeouts
    #[serde(default)]
    pub relay: RelaySection,
    /// Directory service settings
    #[serde(default)]
    pub registry: RegistrySection,
    /// Overlay network settings
    #[serde(default)]
    pub overlay: OverlaySection,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingSection,
    /// Devices to expose
    #[serde(default, rename = "device")]
    pub devices: Vec<DeviceSection>,
}

/// Relay port bands and timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySection {
    /// TCP band for devices serving on port 80
    #[serde(default = "default_tcp_base")]
    pub tcp_base: u16,
    /// TCP band for devices serving on other ports
    #[serde(default = "default_alt_tcp_base")]
    pub alt_tcp_base: u16,
    /// UDP media band
    #[serde(default = "default_udp_base")]
    pub udp_base: u16,
    /// Connect timeout for the device leg, in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Directory service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySection {
    /// Base URL of the directory service; empty disables registration
    #[serde(default)]
    pub directory_url: String,
    /// Heartbeat interval in seconds
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Free-text location tag included in the announcement
    #[serde(default)]
    pub location: String,
}

/// Overlay network settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlaySection {
    /// Address prefix of the overlay-managed range
    #[serde(default = "default_overlay_prefix")]
    pub prefix: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Log filter, e.g. "info" or "kvmlink_relay=debug"
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// One device to expose through the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSection {
    /// Device address on the private LAN
    pub ip: Ipv4Addr,
    /// Device control/signaling port
    #[serde(default = "default_device_port")]
    pub port: u16,
    /// Display name reported to the directory
    #[serde(default)]
    pub name: String,
}

fn default_tcp_base() -> u16 {
    18000
}

fn default_alt_tcp_base() -> u16 {
    19000
}

fn default_udp_base() -> u16 {
    28000
}

fn default_connect_timeout_secs() -> u64 {
    3
}

fn default_heartbeat_secs() -> u64 {
    60
}

fn default_overlay_prefix() -> String {
    kvmlink_registry::DEFAULT_OVERLAY_PREFIX.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_device_port() -> u16 {
    80
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            tcp_base: default_tcp_base(),
            alt_tcp_base: default_alt_tcp_base(),
            udp_base: default_udp_base(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            directory_url: String::new(),
            heartbeat_secs: default_heartbeat_secs(),
            location: String::new(),
        }
    }
}

impl Default for OverlaySection {
    fn default() -> Self {
        Self {
            prefix: default_overlay_prefix(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("kvmlink/config.toml")
    }

    /// Manager configuration derived from the relay section.
    #[must_use]
    pub fn manager_config(&self) -> RelayManagerConfig {
        RelayManagerConfig {
            bands: PortBands {
                tcp_base: self.relay.tcp_base,
                alt_tcp_base: self.relay.alt_tcp_base,
                udp_base: self.relay.udp_base,
            },
            connect_timeout: Duration::from_secs(self.relay.connect_timeout_secs),
        }
    }

    /// Validate field combinations the type system cannot catch.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid field.
    pub fn validate(&self) -> anyhow::Result<()> {
        // Three ladder steps of +1000 must stay inside u16 range.
        for (name, base) in [
            ("relay.tcp_base", self.relay.tcp_base),
            ("relay.alt_tcp_base", self.relay.alt_tcp_base),
            ("relay.udp_base", self.relay.udp_base),
        ] {
            if base.checked_add(255 + 2000).is_none() {
                anyhow::bail!("{name} = {base} leaves no room for the retry ladder");
            }
        }
        if self.relay.alt_tcp_base < self.relay.tcp_base {
            anyhow::bail!("relay.alt_tcp_base must not be below relay.tcp_base");
        }
        // Alternate-band candidates transpose into the UDP band too.
        let band_span = u32::from(self.relay.alt_tcp_base - self.relay.tcp_base);
        if u32::from(self.relay.udp_base) + band_span + 255 + 2000 > u32::from(u16::MAX) {
            anyhow::bail!("relay.udp_base leaves no room for alternate-band candidates");
        }
        if self.registry.heartbeat_secs == 0 {
            anyhow::bail!("registry.heartbeat_secs must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.relay.tcp_base, 18000);
        assert_eq!(config.relay.alt_tcp_base, 19000);
        assert_eq!(config.relay.udp_base, 28000);
        assert_eq!(config.overlay.prefix, "10.147.");
    }

    #[test]
    fn toml_roundtrip_preserves_devices() {
        let mut config = Config::default();
        config.devices.push(DeviceSection {
            ip: "192.168.68.100".parse().unwrap(),
            port: 80,
            name: "bench kvm".to_string(),
        });

        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.devices.len(), 1);
        assert_eq!(parsed.devices[0].name, "bench kvm");
        assert_eq!(parsed.devices[0].port, 80);
    }

    #[test]
    fn missing_sections_take_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [[device]]
            ip = "192.168.68.7"
            name = "lab kvm"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.devices[0].port, 80);
        assert_eq!(parsed.relay.tcp_base, 18000);
        assert_eq!(parsed.registry.heartbeat_secs, 60);
    }

    #[test]
    fn validate_rejects_band_overflow() {
        let mut config = Config::default();
        config.relay.udp_base = 64000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.registry.directory_url = "http://directory.example:8080".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.registry.directory_url, "http://directory.example:8080");
    }
}
