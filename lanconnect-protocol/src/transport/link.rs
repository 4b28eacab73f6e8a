//! Link providers
//!
//! A link provider hands out per-session TLS configuration for a given peer.
//! Peers are authenticated by certificate pinning: the certificate presented
//! during the handshake must be byte-identical to the one stored for that
//! device when it was paired.

use super::tls_config::{create_client_config, create_server_config};
use crate::crypto::DeviceIdentity;
use crate::{ProtocolError, Result};
use openssl::ssl::{Ssl, SslAcceptor, SslConnector, SslVerifyMode};
use openssl::x509::{X509StoreContextRef, X509};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Configures TLS sessions for a peer
pub trait LinkProvider: Send + Sync {
    /// Build a TLS session for `device_id`
    ///
    /// `is_server` selects the listening role. The session must reject a
    /// peer whose certificate differs from the trusted record.
    fn configure_ssl(&self, device_id: &str, is_server: bool) -> Result<Ssl>;
}

/// Source of pinned peer certificates
pub trait TrustStore: Send + Sync {
    fn trusted_certificate(&self, device_id: &str) -> Option<X509>;
}

/// In-memory trust store
#[derive(Default)]
pub struct MemoryTrustStore {
    certificates: RwLock<HashMap<String, X509>>,
}

impl MemoryTrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the certificate of a paired device, replacing any previous one
    pub fn trust(&self, device_id: impl Into<String>, certificate: X509) {
        let device_id = device_id.into();
        debug!("Trusting certificate for device {}", device_id);
        if let Ok(mut certificates) = self.certificates.write() {
            certificates.insert(device_id, certificate);
        }
    }

    /// Forget a device; returns whether it was trusted
    pub fn forget(&self, device_id: &str) -> bool {
        self.certificates
            .write()
            .map(|mut certificates| certificates.remove(device_id).is_some())
            .unwrap_or(false)
    }
}

impl TrustStore for MemoryTrustStore {
    fn trusted_certificate(&self, device_id: &str) -> Option<X509> {
        self.certificates
            .read()
            .ok()
            .and_then(|certificates| certificates.get(device_id).cloned())
    }
}

/// LAN link provider backed by this device's identity and a trust store
pub struct LanLinkProvider {
    acceptor: SslAcceptor,
    connector: SslConnector,
    trust: Arc<dyn TrustStore>,
}

impl LanLinkProvider {
    pub fn new(identity: &DeviceIdentity, trust: Arc<dyn TrustStore>) -> Result<Self> {
        Ok(Self {
            acceptor: create_server_config(identity)?,
            connector: create_client_config(identity)?,
            trust,
        })
    }
}

impl LinkProvider for LanLinkProvider {
    fn configure_ssl(&self, device_id: &str, is_server: bool) -> Result<Ssl> {
        let trusted = self.trust.trusted_certificate(device_id).ok_or_else(|| {
            ProtocolError::CertificateValidation(format!(
                "No trusted certificate for device {}",
                device_id
            ))
        })?;
        let trusted_der = trusted.to_der()?;

        let context = if is_server {
            self.acceptor.context()
        } else {
            self.connector.context()
        };
        let mut ssl = Ssl::new(context)?;

        let mode = if is_server {
            SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT
        } else {
            SslVerifyMode::PEER
        };
        let device_id = device_id.to_string();
        ssl.set_verify_callback(mode, move |_preverified, store| {
            verify_pinned(&device_id, &trusted_der, store)
        });

        Ok(ssl)
    }
}

/// Accept the chain only if its leaf equals the pinned certificate
///
/// Chain-building errors are ignored: device certificates are self-signed.
fn verify_pinned(device_id: &str, trusted_der: &[u8], store: &mut X509StoreContextRef) -> bool {
    if store.error_depth() != 0 {
        return true;
    }

    let presented = match store.current_cert().map(|cert| cert.to_der()) {
        Some(Ok(der)) => der,
        _ => {
            warn!("Peer {} presented no usable certificate", device_id);
            return false;
        }
    };

    if presented == trusted_der {
        true
    } else {
        warn!(
            "Certificate presented by {} does not match the paired certificate",
            device_id
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_trust_store() {
        let identity = DeviceIdentity::generate("peer").unwrap();
        let store = MemoryTrustStore::new();

        assert!(store.trusted_certificate("peer").is_none());

        store.trust("peer", identity.certificate().x509().clone());
        let trusted = store.trusted_certificate("peer").unwrap();
        assert_eq!(
            trusted.to_der().unwrap(),
            identity.certificate().to_der().unwrap()
        );

        assert!(store.forget("peer"));
        assert!(!store.forget("peer"));
    }

    #[test]
    fn test_configure_ssl_requires_trusted_peer() {
        let identity = DeviceIdentity::generate("local").unwrap();
        let store = Arc::new(MemoryTrustStore::new());
        let provider = LanLinkProvider::new(&identity, store.clone()).unwrap();

        let error = provider.configure_ssl("unknown", true).unwrap_err();
        assert!(matches!(error, ProtocolError::CertificateValidation(_)));

        let peer = DeviceIdentity::generate("peer").unwrap();
        store.trust("peer", peer.certificate().x509().clone());
        assert!(provider.configure_ssl("peer", true).is_ok());
        assert!(provider.configure_ssl("peer", false).is_ok());
    }
}
