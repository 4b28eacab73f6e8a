//! TLS configuration for device links
//!
//! Server and client contexts carry this device's certificate and key.
//! Peer verification is not configured here: it is set per session by the
//! [`LinkProvider`](super::LinkProvider), which knows which device the session
//! belongs to.
//!
//! TLS 1.0 stays enabled for older Android peers.

use crate::crypto::DeviceIdentity;
use crate::{ProtocolError, Result};
use openssl::ssl::{
    SslAcceptor, SslAcceptorBuilder, SslConnector, SslConnectorBuilder, SslContextBuilder,
    SslMethod, SslVerifyMode, SslVersion,
};
use std::ops::DerefMut;
use tracing::debug;

/// Cipher suites accepted by peers (v1.4+)
///
/// ECDHE-RSA-AES128-SHA is required for TLS 1.0 devices, and `@SECLEVEL=1`
/// keeps OpenSSL from rejecting it.
pub const CIPHER_LIST: &str =
    "ECDHE-ECDSA-AES256-GCM-SHA384:ECDHE-ECDSA-AES128-GCM-SHA256:ECDHE-RSA-AES128-SHA:@SECLEVEL=1";

fn tls_error(what: &str, error: impl std::fmt::Display) -> ProtocolError {
    ProtocolError::CertificateValidation(format!("Failed to {}: {}", what, error))
}

fn apply_common(builder: &mut SslContextBuilder, identity: &DeviceIdentity) -> Result<()> {
    builder
        .set_min_proto_version(Some(SslVersion::TLS1))
        .map_err(|e| tls_error("set min TLS version", e))?;

    builder
        .set_max_proto_version(Some(SslVersion::TLS1_3))
        .map_err(|e| tls_error("set max TLS version", e))?;

    builder
        .set_cipher_list(CIPHER_LIST)
        .map_err(|e| tls_error("set cipher list", e))?;

    // Sessions install their own verify callback
    builder.set_verify(SslVerifyMode::NONE);

    builder
        .set_certificate(identity.certificate().x509())
        .map_err(|e| tls_error("set certificate", e))?;

    builder
        .set_private_key(identity.private_key())
        .map_err(|e| tls_error("set private key", e))?;

    builder
        .check_private_key()
        .map_err(|e| tls_error("match private key to certificate", e))?;

    Ok(())
}

/// Create the TLS acceptor used by the side that listens (payload sender)
pub fn create_server_config(identity: &DeviceIdentity) -> Result<SslAcceptor> {
    debug!(
        "Creating TLS server config for device {}",
        identity.device_id()
    );

    let mut builder: SslAcceptorBuilder =
        SslAcceptor::mozilla_intermediate_v5(SslMethod::tls_server())
            .map_err(|e| tls_error("create SSL acceptor", e))?;
    apply_common(builder.deref_mut(), identity)?;

    Ok(builder.build())
}

/// Create the TLS connector used by the side that dials (payload receiver)
pub fn create_client_config(identity: &DeviceIdentity) -> Result<SslConnector> {
    debug!(
        "Creating TLS client config for device {}",
        identity.device_id()
    );

    let mut builder: SslConnectorBuilder = SslConnector::builder(SslMethod::tls_client())
        .map_err(|e| tls_error("create SSL connector", e))?;
    apply_common(builder.deref_mut(), identity)?;

    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_server_config() {
        let identity = DeviceIdentity::generate("test_device").unwrap();
        let acceptor = create_server_config(&identity).unwrap();

        assert!(acceptor.context().certificate().is_some());
        assert!(acceptor.context().private_key().is_some());
    }

    #[test]
    fn test_create_client_config() {
        let identity = DeviceIdentity::generate("device1").unwrap();
        let connector = create_client_config(&identity).unwrap();

        let cert = connector.context().certificate().unwrap();
        assert_eq!(
            cert.to_der().unwrap(),
            identity.certificate().to_der().unwrap()
        );
    }
}
