//! LAN Connect Protocol Engine
//!
//! Core of a LAN device-sync daemon: the newline-delimited JSON packet codec,
//! the device identity (RSA key and self-signed certificate) and the
//! out-of-band payload transfer that streams bytes over TLS.

pub mod crypto;
pub mod device;
pub mod packet;
pub mod payload;
pub mod transport;

mod error;
pub use crypto::{Certificate, CertificateBuilder, DeviceIdentity, KeyMaterial, SubjectField};
pub use device::{
    generate_device_id, identity_packet, CapabilitySet, DeviceConfig, DeviceType, PluginRegistry,
};
pub use error::{CryptoError, ProtocolError, Result};
pub use packet::{current_timestamp, Packet, PACKET_TYPE_IDENTITY, UNKNOWN_PAYLOAD_SIZE};
pub use payload::{
    BytesSource, FileSource, JobError, JobResult, JobState, PayloadClient, PayloadSource,
    UploadHandle, UploadJob,
};
pub use transport::{LanLinkProvider, LinkProvider, MemoryTrustStore, PacketStream, TrustStore};

/// Protocol version we implement
pub const PROTOCOL_VERSION: u32 = 7;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_version() {
        assert_eq!(PROTOCOL_VERSION, 7);
    }
}
