//! CLI Configuration
//!
//! TOML configuration for the LAN Connect command-line tool.

use anyhow::{Context, Result};
use lanconnect_protocol::{generate_device_id, DeviceType, PluginRegistry};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const CONFIG_FILE: &str = "config.toml";

/// Tool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Device configuration
    pub device: DeviceSettings,

    /// Network configuration
    #[serde(default)]
    pub network: NetworkConfig,

    /// Capabilities announced in the identity packet
    #[serde(default)]
    pub plugins: PluginConfig,

    /// Storage paths
    pub paths: PathConfig,
}

/// Device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Device name
    pub name: String,

    /// Device type (desktop, laptop, phone, tablet, tv)
    #[serde(default)]
    pub device_type: DeviceType,

    /// Device ID (auto-generated if not set)
    #[serde(default)]
    pub device_id: Option<String>,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// TCP transfer port range start
    #[serde(default = "default_transfer_port_start")]
    pub transfer_port_start: u16,

    /// TCP transfer port range end
    #[serde(default = "default_transfer_port_end")]
    pub transfer_port_end: u16,

    /// Address payload listeners bind to
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
}

/// Plugin capability lists
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Packet types this device accepts
    #[serde(default = "default_capabilities")]
    pub incoming: Vec<String>,

    /// Packet types this device sends
    #[serde(default = "default_capabilities")]
    pub outgoing: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    pub config_dir: PathBuf,

    pub data_dir: PathBuf,

    pub cert_dir: PathBuf,
}

fn default_transfer_port_start() -> u16 {
    lanconnect_protocol::payload::MIN_PORT
}

fn default_transfer_port_end() -> u16 {
    lanconnect_protocol::payload::MAX_PORT
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_capabilities() -> Vec<String> {
    vec![
        "kdeconnect.ping".to_string(),
        "kdeconnect.share.request".to_string(),
    ]
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            transfer_port_start: default_transfer_port_start(),
            transfer_port_end: default_transfer_port_end(),
            bind_address: default_bind_address(),
        }
    }
}

impl NetworkConfig {
    pub fn transfer_ports(&self) -> RangeInclusive<u16> {
        self.transfer_port_start..=self.transfer_port_end
    }
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            incoming: default_capabilities(),
            outgoing: default_capabilities(),
        }
    }
}

impl PluginRegistry for PluginConfig {
    fn incoming_capabilities(&self) -> Vec<String> {
        self.incoming.clone()
    }

    fn outgoing_capabilities(&self) -> Vec<String> {
        self.outgoing.clone()
    }
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = default_config_dir();
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join("lanconnect");

        Self {
            device: DeviceSettings {
                name: default_device_name(),
                device_type: DeviceType::Desktop,
                device_id: None,
            },
            network: NetworkConfig::default(),
            plugins: PluginConfig::default(),
            paths: PathConfig {
                cert_dir: config_dir.join("certs"),
                config_dir,
                data_dir,
            },
        }
    }
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(".config"))
        .join("lanconnect")
}

fn default_device_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "LAN Connect Device".to_string())
}

/// Default location of the configuration file
pub fn default_config_path() -> PathBuf {
    default_config_dir().join(CONFIG_FILE)
}

impl Config {
    /// Load configuration from `path`, or from the default location
    ///
    /// A missing file yields the defaults; nothing is written.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(default_config_path);

        if !config_path.exists() {
            debug!(
                "No config at {}, using defaults",
                config_path.display()
            );
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", config_path.display()))?;
        Ok(config)
    }

    /// Save configuration to `<config_dir>/config.toml`
    pub fn save(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.paths.config_dir).context("Failed to create config directory")?;

        let config_path = self.paths.config_dir.join(CONFIG_FILE);
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&config_path, contents).context("Failed to write config file")?;

        Ok(config_path)
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.paths.config_dir).context("Failed to create config directory")?;
        fs::create_dir_all(&self.paths.data_dir).context("Failed to create data directory")?;
        fs::create_dir_all(&self.paths.cert_dir)
            .context("Failed to create certificate directory")?;
        Ok(())
    }

    /// Get the certificate path for this device
    pub fn certificate_path(&self) -> PathBuf {
        self.paths.cert_dir.join("device.crt")
    }

    /// Get the private key path for this device
    pub fn private_key_path(&self) -> PathBuf {
        self.paths.cert_dir.join("device.key")
    }

    /// Get the device ID file path (for persisting auto-generated device IDs)
    pub fn device_id_path(&self) -> PathBuf {
        self.paths.data_dir.join("device_id")
    }

    /// Load device ID from config or saved file
    ///
    /// Priority:
    /// 1. Config file device_id setting
    /// 2. Saved device_id file
    /// 3. None (caller should generate new)
    pub fn load_device_id(&self) -> Option<String> {
        if let Some(ref id) = self.device.device_id {
            return Some(id.clone());
        }

        let device_id_path = self.device_id_path();
        let id = fs::read_to_string(&device_id_path).ok()?;
        let id = id.trim().to_string();
        if id.is_empty() {
            return None;
        }

        info!("Loaded device ID from {}", device_id_path.display());
        Some(id)
    }

    /// Save a generated device ID to file
    pub fn save_device_id(&self, device_id: &str) -> Result<()> {
        let device_id_path = self.device_id_path();

        if let Some(parent) = device_id_path.parent() {
            fs::create_dir_all(parent).context("Failed to create data directory")?;
        }

        fs::write(&device_id_path, device_id).context("Failed to save device ID")?;
        info!("Saved device ID to {}", device_id_path.display());
        Ok(())
    }

    /// Fill in the device ID, generating and persisting one if needed
    pub fn resolve_device_id(&mut self) -> Result<String> {
        let device_id = match self.load_device_id() {
            Some(id) => id,
            None => {
                let id = generate_device_id();
                info!("Generated new device ID: {}", id);
                self.save_device_id(&id)?;
                id
            }
        };

        self.device.device_id = Some(device_id.clone());
        Ok(device_id)
    }
}

impl lanconnect_protocol::DeviceConfig for Config {
    fn device_id(&self) -> String {
        self.device.device_id.clone().unwrap_or_default()
    }

    fn device_name(&self) -> String {
        self.device.name.clone()
    }

    fn device_type(&self) -> DeviceType {
        self.device.device_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanconnect_protocol::{identity_packet, DeviceConfig};
    use tempfile::TempDir;

    fn config_in(dir: &Path) -> Config {
        let mut config = Config::default();
        config.paths = PathConfig {
            config_dir: dir.join("config"),
            data_dir: dir.join("data"),
            cert_dir: dir.join("config").join("certs"),
        };
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.transfer_port_start, 1739);
        assert_eq!(config.network.transfer_port_end, 1764);
        assert_eq!(config.network.transfer_ports().count(), 26);
        assert_eq!(config.device.device_type, DeviceType::Desktop);
        assert!(config.device.device_id.is_none());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(
            parsed.network.transfer_port_start,
            config.network.transfer_port_start
        );
        assert_eq!(parsed.plugins.incoming, config.plugins.incoming);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [device]
            name = "Workstation"
            device_type = "laptop"

            [paths]
            config_dir = "/tmp/lc"
            data_dir = "/tmp/lc/data"
            cert_dir = "/tmp/lc/certs"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.device.device_type, DeviceType::Laptop);
        assert_eq!(parsed.network.bind_address, default_bind_address());
        assert_eq!(parsed.plugins.outgoing, default_capabilities());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.network.transfer_port_start, 1739);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(dir.path());
        config.device.name = "Saved".to_string();

        let path = config.save().unwrap();
        let loaded = Config::load(Some(&path)).unwrap();

        assert_eq!(loaded.device.name, "Saved");
        assert_eq!(loaded.paths.data_dir, config.paths.data_dir);
    }

    #[test]
    fn test_resolve_device_id_persists() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(dir.path());

        let id = config.resolve_device_id().unwrap();
        assert!(!id.contains('-'));

        let mut reloaded = config_in(dir.path());
        assert_eq!(reloaded.resolve_device_id().unwrap(), id);
        assert_eq!(reloaded.device_id(), id);
    }

    #[test]
    fn test_identity_packet_from_config() {
        let mut config = Config::default();
        config.device.device_id = Some("abc_123".to_string());

        let packet = identity_packet(&config, &config.plugins);
        assert_eq!(
            packet.get_body_field::<String>("deviceId"),
            Some("abc_123".to_string())
        );
        assert_eq!(
            packet.get_body_field::<Vec<String>>("incomingCapabilities"),
            Some(default_capabilities())
        );
    }
}
