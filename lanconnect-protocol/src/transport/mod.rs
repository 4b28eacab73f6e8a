//! Link transport
//!
//! - [`tls_config`]: TLS contexts built from this device's identity
//! - [`link`]: per-peer session configuration with certificate pinning
//! - [`stream`]: newline-framed packet exchange over any byte stream

pub mod link;
pub mod stream;
pub mod tls_config;

pub use link::{LanLinkProvider, LinkProvider, MemoryTrustStore, TrustStore};
pub use stream::{PacketStream, MAX_PACKET_SIZE};
pub use tls_config::{create_client_config, create_server_config};
