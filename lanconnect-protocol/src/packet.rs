//! Network Packet
//!
//! This module implements the packet envelope of the device-sync protocol.
//! Packets are compact JSON objects terminated by a single newline.
//!
//! ## Packet Structure
//!
//! Each packet contains:
//! - `id`: UNIX epoch timestamp in milliseconds
//! - `type`: Packet type in format `kdeconnect.<plugin>[.<action>]`
//! - `body`: JSON dictionary of plugin-specific parameters
//! - `payloadSize`: (only with a payload) size in bytes, `-1` when unknown
//! - `payloadTransferInfo`: (only with a payload) transport parameters, here `{"port": N}`
//!
//! ## Decoding rules
//!
//! Decoding walks the JSON object field by field. Unknown fields are logged and skipped, fields of the
//! wrong JSON type are logged and keep their default, absent fields keep
//! their default. `payloadSize` falls back to `body.size` (older peers put
//! the size there) and then to [`UNKNOWN_PAYLOAD_SIZE`].
//!
//! ## References
//! - [Valent Protocol Reference](https://valent.andyholmes.ca/documentation/protocol.html)

use crate::{ProtocolError, Result, PROTOCOL_VERSION};
use crate::device::DeviceType;
use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::{debug, warn};

/// Packet type announcing a device's identity
pub const PACKET_TYPE_IDENTITY: &str = "kdeconnect.identity";

/// Payload size sentinel for unknown length (streamed payloads)
pub const UNKNOWN_PAYLOAD_SIZE: i64 = -1;

const FIELD_ID: &str = "id";
const FIELD_TYPE: &str = "type";
const FIELD_BODY: &str = "body";
const FIELD_PAYLOAD_SIZE: &str = "payloadSize";
const FIELD_PAYLOAD_TRANSFER_INFO: &str = "payloadTransferInfo";

/// Legacy body key carrying the payload size
const LEGACY_SIZE_KEY: &str = "size";

/// Represents a network packet
///
/// A packet has a payload exactly when `payload_transfer_info` is set; only
/// then are `payloadSize` and `payloadTransferInfo` written to the wire.
///
/// # Examples
///
/// ```
/// use lanconnect_protocol::Packet;
/// use serde_json::json;
///
/// let packet = Packet::new("kdeconnect.ping", json!({ "message": "hello" }));
///
/// let bytes = packet.to_bytes().unwrap();
/// assert_eq!(bytes.last(), Some(&b'\n'));
///
/// let parsed = Packet::from_bytes(&bytes).unwrap();
/// assert_eq!(parsed.packet_type, "kdeconnect.ping");
/// assert_eq!(parsed.payload_size, -1);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// UNIX timestamp in milliseconds; correlation only, never a protocol key
    pub id: i64,

    /// Packet type in format: kdeconnect.<plugin>[.<action>]
    pub packet_type: String,

    /// Plugin-specific parameters
    pub body: Map<String, Value>,

    /// Payload size in bytes, [`UNKNOWN_PAYLOAD_SIZE`] when unknown or absent
    pub payload_size: i64,

    /// Payload transfer negotiation info, present only with a payload
    pub payload_transfer_info: Option<Map<String, Value>>,
}

/// Borrowed wire view used for encoding
#[derive(Serialize)]
struct WirePacket<'a> {
    id: i64,
    #[serde(rename = "type")]
    packet_type: &'a str,
    body: &'a Map<String, Value>,
    #[serde(rename = "payloadSize", skip_serializing_if = "Option::is_none")]
    payload_size: Option<i64>,
    #[serde(
        rename = "payloadTransferInfo",
        skip_serializing_if = "Option::is_none"
    )]
    payload_transfer_info: Option<&'a Map<String, Value>>,
}

impl Packet {
    /// Creates a new packet with the specified type and body
    ///
    /// The packet ID is set to the current timestamp in milliseconds. A body
    /// that is not a JSON object is replaced by an empty one.
    pub fn new(packet_type: impl Into<String>, body: Value) -> Self {
        Self::with_id(current_timestamp(), packet_type, body)
    }

    /// Create a new packet with an explicit id
    pub fn with_id(id: i64, packet_type: impl Into<String>, body: Value) -> Self {
        let packet_type = packet_type.into();
        let body = match body {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                warn!(
                    "Packet body for '{}' must be an object, got {}; using empty body",
                    packet_type,
                    json_kind(&other)
                );
                Map::new()
            }
        };

        let payload_size = legacy_size(&body).unwrap_or(UNKNOWN_PAYLOAD_SIZE);
        Self {
            id,
            packet_type,
            body,
            payload_size,
            payload_transfer_info: None,
        }
    }

    /// Build the identity packet announcing this device
    ///
    /// The type is always [`PACKET_TYPE_IDENTITY`] and `protocolVersion` is
    /// always [`PROTOCOL_VERSION`]; the capability lists are copied verbatim.
    pub fn identity(
        device_id: &str,
        device_name: &str,
        device_type: DeviceType,
        incoming_capabilities: Vec<String>,
        outgoing_capabilities: Vec<String>,
    ) -> Self {
        let mut body = Map::new();
        body.insert("deviceId".to_string(), Value::from(device_id));
        body.insert("deviceName".to_string(), Value::from(device_name));
        body.insert("deviceType".to_string(), Value::from(device_type.as_str()));
        body.insert(
            "incomingCapabilities".to_string(),
            Value::from(incoming_capabilities),
        );
        body.insert(
            "outgoingCapabilities".to_string(),
            Value::from(outgoing_capabilities),
        );
        body.insert("protocolVersion".to_string(), Value::from(PROTOCOL_VERSION));

        Self::with_id(current_timestamp(), PACKET_TYPE_IDENTITY, Value::Object(body))
    }

    /// Serialize packet to bytes with newline terminator
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Json` if serialization fails and
    /// `ProtocolError::InvalidPacket` if it yields no output; nothing must be
    /// transmitted in either case.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let wire = WirePacket {
            id: self.id,
            packet_type: &self.packet_type,
            body: &self.body,
            payload_size: self.payload_transfer_info.as_ref().map(|_| self.payload_size),
            payload_transfer_info: self.payload_transfer_info.as_ref(),
        };

        let mut bytes = serde_json::to_vec(&wire)?;
        if bytes.is_empty() {
            return Err(ProtocolError::InvalidPacket(format!(
                "serialization of '{}' produced no output",
                self.packet_type
            )));
        }

        if wire.payload_transfer_info.is_some() {
            debug!("Serialized payload transfer info for '{}'", self.packet_type);
        }

        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Deserialize a packet from bytes
    ///
    /// Accepts `\n` or `\r\n` terminated and unterminated input.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Decode` with the parser diagnostic if the data
    /// is not a JSON object. Field-level problems are logged, not returned.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let trimmed = data
            .strip_suffix(b"\r\n")
            .or_else(|| data.strip_suffix(b"\n"))
            .unwrap_or(data);

        let value: Value = serde_json::from_slice(trimmed).map_err(|e| {
            debug!("Packet deserialization error: {}", e);
            ProtocolError::Decode(e.to_string())
        })?;

        let fields = match value {
            Value::Object(fields) => fields,
            other => {
                return Err(ProtocolError::Decode(format!(
                    "expected a JSON object, got {}",
                    json_kind(&other)
                )))
            }
        };

        let mut packet = Self {
            id: 0,
            packet_type: String::new(),
            body: Map::new(),
            payload_size: UNKNOWN_PAYLOAD_SIZE,
            payload_transfer_info: None,
        };
        let mut declared_size = None;

        for (name, value) in fields {
            match name.as_str() {
                FIELD_ID => match parse_id(&value) {
                    Some(id) => packet.id = id,
                    None => warn_mismatch(FIELD_ID, &value),
                },
                FIELD_TYPE => match value {
                    Value::String(packet_type) => packet.packet_type = packet_type,
                    other => warn_mismatch(FIELD_TYPE, &other),
                },
                FIELD_BODY => match value {
                    Value::Object(body) => packet.body = body,
                    other => warn_mismatch(FIELD_BODY, &other),
                },
                FIELD_PAYLOAD_SIZE => match value.as_i64() {
                    Some(size) => declared_size = Some(size),
                    None => warn_mismatch(FIELD_PAYLOAD_SIZE, &value),
                },
                FIELD_PAYLOAD_TRANSFER_INFO => match value {
                    Value::Object(info) => packet.payload_transfer_info = Some(info),
                    Value::Null => {}
                    other => warn_mismatch(FIELD_PAYLOAD_TRANSFER_INFO, &other),
                },
                unknown => warn!("Ignoring unknown packet field '{}'", unknown),
            }
        }

        packet.payload_size = declared_size
            .or_else(|| legacy_size(&packet.body))
            .unwrap_or(UNKNOWN_PAYLOAD_SIZE);

        if packet.payload_size < UNKNOWN_PAYLOAD_SIZE {
            warn!(
                "Invalid payload size {} in '{}' packet",
                packet.payload_size, packet.packet_type
            );
        }

        Ok(packet)
    }

    /// Builder pattern: attach a payload descriptor
    ///
    /// `transfer_info` is the mapping reported by the transfer job
    /// (`{"port": N}` for LAN links).
    pub fn with_payload(mut self, size: i64, transfer_info: Map<String, Value>) -> Self {
        self.payload_size = size;
        self.payload_transfer_info = Some(transfer_info);
        self
    }

    /// Builder pattern: Add a key-value pair to the body
    ///
    /// Without a payload descriptor, `payload_size` follows `body.size` the
    /// same way decoding does.
    pub fn with_body_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let resize = key == LEGACY_SIZE_KEY && self.payload_transfer_info.is_none();
        self.body.insert(key, value.into());
        if resize {
            self.payload_size = legacy_size(&self.body).unwrap_or(UNKNOWN_PAYLOAD_SIZE);
        }
        self
    }

    /// Whether a payload is attached to this packet
    pub fn has_payload(&self) -> bool {
        self.payload_transfer_info.is_some()
    }

    /// Port advertised in the payload transfer info, if any
    pub fn transfer_port(&self) -> Option<u16> {
        self.payload_transfer_info
            .as_ref()
            .and_then(|info| info.get("port"))
            .and_then(Value::as_u64)
            .and_then(|port| u16::try_from(port).ok())
    }

    /// Check if packet is of a specific type
    ///
    /// `kdeconnect.` and `cconnect.` prefixes are treated as equivalent.
    pub fn is_type(&self, packet_type: &str) -> bool {
        if self.packet_type == packet_type {
            return true;
        }

        let alternate = if let Some(rest) = packet_type.strip_prefix("cconnect.") {
            format!("kdeconnect.{}", rest)
        } else if let Some(rest) = packet_type.strip_prefix("kdeconnect.") {
            format!("cconnect.{}", rest)
        } else {
            return false;
        };

        self.packet_type == alternate
    }

    /// Get a field from the body as a specific type
    pub fn get_body_field<T>(&self, key: &str) -> Option<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.body
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Accept the id as a JSON number or a numeric string
fn parse_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse::<i64>().ok(),
        _ => None,
    }
}

fn warn_mismatch(field: &str, value: &Value) {
    warn!(
        "Couldn't set packet field '{}' from {} value; keeping default",
        field,
        json_kind(value)
    );
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

static LAST_TIMESTAMP: AtomicI64 = AtomicI64::new(0);

/// Current UNIX timestamp in milliseconds, never smaller than a previous result
pub fn current_timestamp() -> i64 {
    let now = Utc::now().timestamp_millis();
    LAST_TIMESTAMP.fetch_max(now, Ordering::Relaxed).max(now)
}

/// Payload size older peers put in `body.size`
fn legacy_size(body: &Map<String, Value>) -> Option<i64> {
    body.get(LEGACY_SIZE_KEY).and_then(Value::as_i64)
}
