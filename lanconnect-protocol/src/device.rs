//! Device metadata collaborators
//!
//! The identity packet needs this device's id, name and type plus the
//! capability lists of the plugin registry. Both sources live outside the
//! protocol engine and are consumed through the [`DeviceConfig`] and
//! [`PluginRegistry`] traits.
//!
//! Identity packets (`kdeconnect.identity`) contain:
//! - `deviceId`: UUIDv4 with underscores (e.g. `740bd4b9_b418_4ee4_97d6_caf1da8151be`)
//! - `deviceName`: human-readable name
//! - `deviceType`: desktop, laptop, phone, tablet or tv
//! - `protocolVersion`: 7
//! - `incomingCapabilities` / `outgoingCapabilities`: packet types handled

use crate::{Packet, ProtocolError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Device types announced in identity packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    #[default]
    Desktop,
    Laptop,
    Phone,
    Tablet,
    Tv,
}

impl DeviceType {
    /// Convert device type to its wire string
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Desktop => "desktop",
            DeviceType::Laptop => "laptop",
            DeviceType::Phone => "phone",
            DeviceType::Tablet => "tablet",
            DeviceType::Tv => "tv",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "desktop" => Ok(DeviceType::Desktop),
            "laptop" => Ok(DeviceType::Laptop),
            "phone" | "smartphone" => Ok(DeviceType::Phone),
            "tablet" => Ok(DeviceType::Tablet),
            "tv" => Ok(DeviceType::Tv),
            other => Err(ProtocolError::Configuration(format!(
                "unknown device type '{}'",
                other
            ))),
        }
    }
}

/// This device's identity metadata
pub trait DeviceConfig {
    fn device_id(&self) -> String;
    fn device_name(&self) -> String;
    fn device_type(&self) -> DeviceType;
}

/// Read side of the plugin capability registry
pub trait PluginRegistry {
    /// Packet types this device can receive
    fn incoming_capabilities(&self) -> Vec<String>;

    /// Packet types this device can send
    fn outgoing_capabilities(&self) -> Vec<String>;
}

/// Fixed capability lists, for daemons without a dynamic plugin set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    pub incoming: Vec<String>,
    pub outgoing: Vec<String>,
}

impl PluginRegistry for CapabilitySet {
    fn incoming_capabilities(&self) -> Vec<String> {
        self.incoming.clone()
    }

    fn outgoing_capabilities(&self) -> Vec<String> {
        self.outgoing.clone()
    }
}

/// Build the identity packet from the device and plugin collaborators
pub fn identity_packet(config: &dyn DeviceConfig, registry: &dyn PluginRegistry) -> Packet {
    Packet::identity(
        &config.device_id(),
        &config.device_name(),
        config.device_type(),
        registry.incoming_capabilities(),
        registry.outgoing_capabilities(),
    )
}

/// Generate a UUIDv4 device ID with underscores
///
/// Peers expect underscores instead of hyphens.
pub fn generate_device_id() -> String {
    Uuid::new_v4().to_string().replace('-', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PACKET_TYPE_IDENTITY;

    struct TestDevice;

    impl DeviceConfig for TestDevice {
        fn device_id(&self) -> String {
            "test_device".to_string()
        }

        fn device_name(&self) -> String {
            "Test Laptop".to_string()
        }

        fn device_type(&self) -> DeviceType {
            DeviceType::Laptop
        }
    }

    #[test]
    fn test_device_type_strings() {
        assert_eq!(DeviceType::Tv.as_str(), "tv");
        assert_eq!("Phone".parse::<DeviceType>().unwrap(), DeviceType::Phone);
        assert_eq!(
            "smartphone".parse::<DeviceType>().unwrap(),
            DeviceType::Phone
        );
        assert!("toaster".parse::<DeviceType>().is_err());
    }

    #[test]
    fn test_identity_packet_from_collaborators() {
        let registry = CapabilitySet {
            incoming: vec!["kdeconnect.ping".to_string()],
            outgoing: vec!["kdeconnect.share.request".to_string()],
        };

        let packet = identity_packet(&TestDevice, &registry);

        assert_eq!(packet.packet_type, PACKET_TYPE_IDENTITY);
        assert_eq!(
            packet.get_body_field::<String>("deviceId"),
            Some("test_device".to_string())
        );
        assert_eq!(
            packet.get_body_field::<String>("deviceName"),
            Some("Test Laptop".to_string())
        );
        assert_eq!(
            packet.get_body_field::<String>("deviceType"),
            Some("laptop".to_string())
        );
        assert_eq!(packet.get_body_field::<i64>("protocolVersion"), Some(7));
        assert_eq!(
            packet.get_body_field::<Vec<String>>("incomingCapabilities"),
            Some(registry.incoming.clone())
        );
    }

    #[test]
    fn test_generate_device_id_format() {
        let id = generate_device_id();
        assert_eq!(id.len(), 36);
        assert!(!id.contains('-'));
        assert_eq!(id.matches('_').count(), 4);
    }
}
