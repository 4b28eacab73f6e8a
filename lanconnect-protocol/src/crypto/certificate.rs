//! Device Identity Certificates
//!
//! Each device authenticates with a self-signed certificate. Peers compare the
//! presented certificate with the one stored at pairing time; nothing chains
//! up to a CA.
//!
//! ## Default Device Certificate
//!
//! - **Algorithm**: RSA 2048-bit, public exponent 65537
//! - **Organization (O)**: "KDE"
//! - **Organizational Unit (OU)**: "Kde connect"
//! - **Common Name (CN)**: Device ID
//! - **Validity**: one year back, ten years ahead
//! - **Serial Number**: 10
//! - **Signature**: SHA-1 (older peers only verify SHA-1 device certificates)
//!
//! ## Fingerprints
//!
//! SHA256 over the DER certificate, shown as colon separated hex bytes, for
//! users to compare on both screens while pairing.

use crate::error::CryptoError;
use crate::{ProtocolError, Result};
use chrono::{DateTime, Duration, Utc};
use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{Id, PKey, Private, Public};
use openssl::rsa::Rsa;
use openssl::x509::{X509NameBuilder, X509NameRef, X509};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Modulus size of generated device keys
pub const RSA_KEY_BITS: u32 = 2048;

/// Standard RSA public exponent (F4)
const RSA_PUBLIC_EXPONENT: u32 = 65537;

/// Serial number of generated device certificates
const CERT_SERIAL: u32 = 10;

/// Certificate validity period (10 years)
const CERT_VALIDITY_YEARS: i64 = 10;

/// Organization name in certificate
const CERT_ORG: &str = "KDE";

/// Organizational unit in certificate
const CERT_ORG_UNIT: &str = "Kde connect";

/// Generate an RSA private key with exponent 65537
///
/// # Errors
///
/// `CryptoError::KeyGeneration` when OpenSSL refuses the request, e.g. a
/// modulus below its minimum. Callers must not fall back to another identity.
pub fn generate_rsa_key(bits: u32) -> std::result::Result<PKey<Private>, CryptoError> {
    let keygen = || -> std::result::Result<PKey<Private>, openssl::error::ErrorStack> {
        let exponent = BigNum::from_u32(RSA_PUBLIC_EXPONENT)?;
        let rsa = Rsa::generate_with_e(bits, &exponent)?;
        PKey::from_rsa(rsa)
    };

    keygen().map_err(|source| {
        warn!("RSA key generation failed for {} bits: {}", bits, source);
        CryptoError::KeyGeneration { bits, source }
    })
}

/// Key material as handed to the certificate builder
///
/// Keys loaded from PEM may be either half of a pair; only private keys can
/// sign.
#[derive(Clone)]
pub enum KeyMaterial {
    Private(PKey<Private>),
    Public(PKey<Public>),
}

impl KeyMaterial {
    /// Parse a PEM private key (PKCS#1 or PKCS#8), or failing that a public key
    pub fn from_pem(pem: &[u8]) -> std::result::Result<Self, CryptoError> {
        match PKey::private_key_from_pem(pem) {
            Ok(key) => Ok(KeyMaterial::Private(key)),
            Err(_) => PKey::public_key_from_pem(pem)
                .map(KeyMaterial::Public)
                .map_err(CryptoError::InvalidKey),
        }
    }

    pub fn is_private(&self) -> bool {
        matches!(self, KeyMaterial::Private(_))
    }

    pub fn algorithm(&self) -> Id {
        match self {
            KeyMaterial::Private(key) => key.id(),
            KeyMaterial::Public(key) => key.id(),
        }
    }

    pub fn bits(&self) -> u32 {
        match self {
            KeyMaterial::Private(key) => key.bits(),
            KeyMaterial::Public(key) => key.bits(),
        }
    }
}

impl From<PKey<Private>> for KeyMaterial {
    fn from(key: PKey<Private>) -> Self {
        KeyMaterial::Private(key)
    }
}

/// Subject attributes a device certificate may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubjectField {
    CommonName,
    Country,
    Locality,
    State,
    Organization,
    OrganizationalUnit,
}

impl SubjectField {
    /// Encoding order inside the subject name
    pub const ALL: [SubjectField; 6] = [
        SubjectField::CommonName,
        SubjectField::Country,
        SubjectField::Locality,
        SubjectField::State,
        SubjectField::Organization,
        SubjectField::OrganizationalUnit,
    ];

    pub fn nid(self) -> Nid {
        match self {
            SubjectField::CommonName => Nid::COMMONNAME,
            SubjectField::Country => Nid::COUNTRYNAME,
            SubjectField::Locality => Nid::LOCALITYNAME,
            SubjectField::State => Nid::STATEORPROVINCENAME,
            SubjectField::Organization => Nid::ORGANIZATIONNAME,
            SubjectField::OrganizationalUnit => Nid::ORGANIZATIONALUNITNAME,
        }
    }
}

/// Builder for self-signed device certificates
///
/// # Examples
///
/// ```
/// use chrono::{Duration, Utc};
/// use lanconnect_protocol::crypto::{generate_rsa_key, CertificateBuilder, SubjectField};
///
/// let key = generate_rsa_key(1024).unwrap();
/// let now = Utc::now();
/// let cert = CertificateBuilder::new(1, now, now + Duration::days(365))
///     .with_subject(SubjectField::CommonName, "device-42")
///     .self_signed(&key.into())
///     .unwrap();
///
/// assert_eq!(cert.common_name().as_deref(), Some("device-42"));
/// ```
#[derive(Debug, Clone)]
pub struct CertificateBuilder {
    subject: BTreeMap<SubjectField, String>,
    serial_number: u32,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

impl CertificateBuilder {
    /// Validity bounds are truncated to whole seconds
    pub fn new(serial_number: u32, not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> Self {
        Self {
            subject: BTreeMap::new(),
            serial_number,
            not_before,
            not_after,
        }
    }

    /// Set a subject attribute; attributes never set are left out of the name
    pub fn with_subject(mut self, field: SubjectField, value: impl Into<String>) -> Self {
        self.subject.insert(field, value.into());
        self
    }

    /// Build and sign the certificate with `key`
    ///
    /// Issuer and subject are the same name. The signature digest is SHA-1.
    ///
    /// # Errors
    ///
    /// - `NotPrivateKey` / `UnsupportedKeyAlgorithm`: the caller passed the
    ///   wrong kind of key
    /// - `Signing`: OpenSSL failed while assembling or signing
    /// - `Encoding`: the signed certificate could not be written as PEM
    pub fn self_signed(&self, key: &KeyMaterial) -> std::result::Result<Certificate, CryptoError> {
        let pkey = match key {
            KeyMaterial::Private(pkey) => pkey,
            KeyMaterial::Public(_) => return Err(CryptoError::NotPrivateKey),
        };

        match pkey.id() {
            Id::RSA | Id::DSA | Id::EC => {}
            other => return Err(CryptoError::UnsupportedKeyAlgorithm(other)),
        }

        let x509 = self.assemble(pkey).map_err(|e| {
            warn!("Certificate signing failed: {}", e);
            CryptoError::Signing(e)
        })?;

        let pem = x509.to_pem().map_err(|e| {
            warn!("Conversion of certificate to PEM format failed: {}", e);
            CryptoError::Encoding(e)
        })?;

        debug!(
            "Signed certificate serial {} for {:?}",
            self.serial_number,
            self.subject.get(&SubjectField::CommonName)
        );

        Ok(Certificate { x509, pem })
    }

    fn assemble(&self, pkey: &PKey<Private>) -> std::result::Result<X509, openssl::error::ErrorStack> {
        let mut builder = X509::builder()?;

        let serial = BigNum::from_u32(self.serial_number)?.to_asn1_integer()?;
        builder.set_serial_number(&serial)?;

        let not_before = Asn1Time::from_unix(self.not_before.timestamp())?;
        let not_after = Asn1Time::from_unix(self.not_after.timestamp())?;
        builder.set_not_before(&not_before)?;
        builder.set_not_after(&not_after)?;

        builder.set_pubkey(pkey)?;

        let mut name = X509NameBuilder::new()?;
        for field in SubjectField::ALL {
            if let Some(value) = self.subject.get(&field) {
                name.append_entry_by_nid(field.nid(), value)?;
            }
        }
        let name = name.build();
        builder.set_subject_name(&name)?;
        builder.set_issuer_name(&name)?;

        builder.sign(pkey, MessageDigest::sha1())?;

        Ok(builder.build())
    }
}

/// A signed device certificate together with its PEM encoding
#[derive(Clone)]
pub struct Certificate {
    x509: X509,
    pem: Vec<u8>,
}

impl Certificate {
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let x509 = X509::from_pem(pem)?;
        Ok(Self {
            x509,
            pem: pem.to_vec(),
        })
    }

    pub fn from_x509(x509: X509) -> Result<Self> {
        let pem = x509.to_pem()?;
        Ok(Self { x509, pem })
    }

    pub fn x509(&self) -> &X509 {
        &self.x509
    }

    pub fn pem(&self) -> &[u8] {
        &self.pem
    }

    pub fn to_der(&self) -> Result<Vec<u8>> {
        Ok(self.x509.to_der()?)
    }

    /// SHA256 fingerprint, `XX:XX:...:XX`
    pub fn fingerprint(&self) -> Result<String> {
        Ok(fingerprint(&self.to_der()?))
    }

    pub fn subject_entry(&self, field: SubjectField) -> Option<String> {
        name_entries(self.x509.subject_name())
            .into_iter()
            .find(|(nid, _)| *nid == field.nid())
            .map(|(_, value)| value)
    }

    pub fn common_name(&self) -> Option<String> {
        self.subject_entry(SubjectField::CommonName)
    }

    /// Number of attributes present in the subject name
    pub fn subject_len(&self) -> usize {
        self.x509.subject_name().entries().count()
    }

    pub fn is_self_issued(&self) -> bool {
        name_entries(self.x509.subject_name()) == name_entries(self.x509.issuer_name())
    }

    pub fn serial_number(&self) -> Option<u64> {
        self.x509
            .serial_number()
            .to_bn()
            .ok()
            .and_then(|bn| bn.to_dec_str().ok())
            .and_then(|dec| dec.parse().ok())
    }

    /// Start of the validity window as UNIX seconds
    pub fn not_before(&self) -> Result<i64> {
        asn1_to_unix(self.x509.not_before())
    }

    /// End of the validity window as UNIX seconds
    pub fn not_after(&self) -> Result<i64> {
        asn1_to_unix(self.x509.not_after())
    }
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("common_name", &self.common_name())
            .field("serial_number", &self.serial_number())
            .finish()
    }
}

fn name_entries(name: &X509NameRef) -> Vec<(Nid, String)> {
    name.entries()
        .map(|entry| {
            let value = String::from_utf8_lossy(entry.data().as_slice()).into_owned();
            (entry.object().nid(), value)
        })
        .collect()
}

fn asn1_to_unix(time: &Asn1TimeRef) -> Result<i64> {
    let epoch = Asn1Time::from_unix(0)?;
    let diff = epoch.diff(time)?;
    Ok(i64::from(diff.days) * 86_400 + i64::from(diff.secs))
}

/// Calculate the SHA256 fingerprint of a DER certificate
///
/// Returns fingerprint in format: XX:XX:XX:...:XX
pub fn fingerprint(cert_der: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cert_der);
    let hash = hasher.finalize();

    hash.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// This device's key pair and self-signed certificate
#[derive(Clone)]
pub struct DeviceIdentity {
    device_id: String,
    private_key: PKey<Private>,
    certificate: Certificate,
}

impl DeviceIdentity {
    /// Generate the identity for a device on first run
    pub fn generate(device_id: impl Into<String>) -> Result<Self> {
        let device_id = device_id.into();
        info!(
            "Generating RSA {}-bit identity for device: {}",
            RSA_KEY_BITS, device_id
        );

        let private_key = generate_rsa_key(RSA_KEY_BITS)?;

        let now = Utc::now();
        let certificate = CertificateBuilder::new(
            CERT_SERIAL,
            now - Duration::days(365),
            now + Duration::days(CERT_VALIDITY_YEARS * 365),
        )
        .with_subject(SubjectField::CommonName, device_id.as_str())
        .with_subject(SubjectField::Organization, CERT_ORG)
        .with_subject(SubjectField::OrganizationalUnit, CERT_ORG_UNIT)
        .self_signed(&KeyMaterial::Private(private_key.clone()))?;

        let identity = Self {
            device_id,
            private_key,
            certificate,
        };
        info!(
            "Generated certificate for device {} with fingerprint: {}",
            identity.device_id,
            identity.fingerprint()?
        );
        Ok(identity)
    }

    /// Pair an existing key and certificate
    ///
    /// The device id is read from the certificate common name.
    pub fn from_parts(private_key: PKey<Private>, certificate: Certificate) -> Result<Self> {
        let public_key = certificate.x509().public_key()?;
        if !public_key.public_eq(&private_key) {
            return Err(ProtocolError::CertificateValidation(
                "private key does not match certificate".to_string(),
            ));
        }

        let device_id = certificate.common_name().ok_or_else(|| {
            ProtocolError::CertificateValidation(
                "Certificate does not contain Common Name".to_string(),
            )
        })?;

        Ok(Self {
            device_id,
            private_key,
            certificate,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn private_key(&self) -> &PKey<Private> {
        &self.private_key
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn fingerprint(&self) -> Result<String> {
        self.certificate.fingerprint()
    }

    /// Save certificate and private key to PEM files
    ///
    /// The key is written as PKCS#8 and readable by the owner only.
    pub fn save_to_files(
        &self,
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<()> {
        let cert_path = cert_path.as_ref();
        let key_path = key_path.as_ref();

        for parent in [cert_path.parent(), key_path.parent()].into_iter().flatten() {
            fs::create_dir_all(parent)?;
        }

        fs::write(cert_path, self.certificate.pem())?;

        let key_pem = self.private_key.private_key_to_pem_pkcs8()?;
        fs::write(key_path, key_pem)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(key_path, fs::Permissions::from_mode(0o600))?;
        }

        info!(
            "Saved certificate to {:?} and private key to {:?}",
            cert_path, key_path
        );

        Ok(())
    }

    /// Load certificate and private key from PEM files
    pub fn load_from_files(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<Self> {
        let cert_path = cert_path.as_ref();
        let key_path = key_path.as_ref();

        debug!("Loading certificate from {:?}", cert_path);

        let certificate = Certificate::from_pem(&fs::read(cert_path)?)?;
        let private_key = match KeyMaterial::from_pem(&fs::read(key_path)?)? {
            KeyMaterial::Private(key) => key,
            KeyMaterial::Public(_) => return Err(CryptoError::NotPrivateKey.into()),
        };

        let identity = Self::from_parts(private_key, certificate)?;
        info!(
            "Loaded certificate for device {} with fingerprint: {}",
            identity.device_id,
            identity.fingerprint()?
        );

        Ok(identity)
    }
}

impl std::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("device_id", &self.device_id)
            .field("certificate", &self.certificate)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::ec::{EcGroup, EcKey};
    use tempfile::TempDir;

    const TEN_YEARS_SECS: i64 = 315_360_000;

    fn window_from(start: i64) -> (DateTime<Utc>, DateTime<Utc>) {
        let not_before = DateTime::from_timestamp(start, 0).unwrap();
        let not_after = DateTime::from_timestamp(start + TEN_YEARS_SECS, 0).unwrap();
        (not_before, not_after)
    }

    #[test]
    fn test_generate_rsa_key() {
        let key = generate_rsa_key(1024).unwrap();
        assert_eq!(key.id(), Id::RSA);
        assert_eq!(key.bits(), 1024);
        assert_eq!(key.rsa().unwrap().e().to_dec_str().unwrap().to_string(), "65537");
    }

    #[test]
    fn test_generate_rsa_key_rejects_tiny_modulus() {
        let result = generate_rsa_key(256);
        assert!(matches!(
            result,
            Err(CryptoError::KeyGeneration { bits: 256, .. })
        ));
    }

    #[test]
    fn test_self_signed_fields() {
        let key = generate_rsa_key(1024).unwrap();
        let t = Utc::now().timestamp();
        let (not_before, not_after) = window_from(t);

        let cert = CertificateBuilder::new(1, not_before, not_after)
            .with_subject(SubjectField::CommonName, "device-42")
            .self_signed(&key.into())
            .unwrap();

        assert_eq!(cert.common_name().as_deref(), Some("device-42"));
        assert_eq!(cert.serial_number(), Some(1));
        assert!((cert.not_before().unwrap() - t).abs() <= 1);
        assert!((cert.not_after().unwrap() - (t + TEN_YEARS_SECS)).abs() <= 1);
        assert!(cert.is_self_issued());
        assert!(cert.pem().starts_with(b"-----BEGIN CERTIFICATE-----"));
    }

    #[test]
    fn test_validity_is_truncated_to_seconds() {
        let key = generate_rsa_key(1024).unwrap();
        let not_before = DateTime::from_timestamp_millis(1_700_000_000_999).unwrap();
        let not_after = DateTime::from_timestamp_millis(1_800_000_000_500).unwrap();

        let cert = CertificateBuilder::new(3, not_before, not_after)
            .with_subject(SubjectField::CommonName, "truncated")
            .self_signed(&key.into())
            .unwrap();

        assert_eq!(cert.not_before().unwrap(), 1_700_000_000);
        assert_eq!(cert.not_after().unwrap(), 1_800_000_000);
    }

    #[test]
    fn test_absent_attributes_are_omitted() {
        let key = generate_rsa_key(1024).unwrap();
        let (not_before, not_after) = window_from(Utc::now().timestamp());

        let cert = CertificateBuilder::new(1, not_before, not_after)
            .with_subject(SubjectField::CommonName, "only-cn")
            .self_signed(&key.into())
            .unwrap();

        assert_eq!(cert.subject_len(), 1);
        assert_eq!(cert.subject_entry(SubjectField::Organization), None);
    }

    #[test]
    fn test_all_subject_attributes() {
        let key = generate_rsa_key(1024).unwrap();
        let (not_before, not_after) = window_from(Utc::now().timestamp());

        let cert = CertificateBuilder::new(7, not_before, not_after)
            .with_subject(SubjectField::CommonName, "device")
            .with_subject(SubjectField::Country, "DE")
            .with_subject(SubjectField::Locality, "Berlin")
            .with_subject(SubjectField::State, "Berlin")
            .with_subject(SubjectField::Organization, "KDE")
            .with_subject(SubjectField::OrganizationalUnit, "Kde connect")
            .self_signed(&key.into())
            .unwrap();

        assert_eq!(cert.subject_len(), 6);
        assert_eq!(cert.subject_entry(SubjectField::Country).as_deref(), Some("DE"));
        assert_eq!(
            cert.subject_entry(SubjectField::OrganizationalUnit).as_deref(),
            Some("Kde connect")
        );
        assert!(cert.is_self_issued());
    }

    #[test]
    fn test_signature_uses_sha1() {
        let key = generate_rsa_key(1024).unwrap();
        let (not_before, not_after) = window_from(Utc::now().timestamp());

        let cert = CertificateBuilder::new(1, not_before, not_after)
            .with_subject(SubjectField::CommonName, "legacy")
            .self_signed(&key.into())
            .unwrap();

        assert_eq!(
            cert.x509().signature_algorithm().object().nid(),
            Nid::SHA1WITHRSAENCRYPTION
        );
    }

    #[test]
    fn test_public_key_is_rejected() {
        let key = generate_rsa_key(1024).unwrap();
        let public_pem = key.public_key_to_pem().unwrap();
        let public = KeyMaterial::from_pem(&public_pem).unwrap();
        assert!(!public.is_private());

        let (not_before, not_after) = window_from(Utc::now().timestamp());
        let result = CertificateBuilder::new(1, not_before, not_after)
            .with_subject(SubjectField::CommonName, "device")
            .self_signed(&public);

        assert!(matches!(result, Err(CryptoError::NotPrivateKey)));
    }

    #[test]
    fn test_unsupported_algorithm_is_rejected() {
        let key = PKey::generate_ed25519().unwrap();
        let (not_before, not_after) = window_from(Utc::now().timestamp());

        let result = CertificateBuilder::new(1, not_before, not_after)
            .with_subject(SubjectField::CommonName, "device")
            .self_signed(&KeyMaterial::Private(key));

        assert!(matches!(
            result,
            Err(CryptoError::UnsupportedKeyAlgorithm(Id::ED25519))
        ));
    }

    #[test]
    fn test_ec_key_is_accepted() {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();
        let (not_before, not_after) = window_from(Utc::now().timestamp());

        let cert = CertificateBuilder::new(2, not_before, not_after)
            .with_subject(SubjectField::CommonName, "ec-device")
            .self_signed(&KeyMaterial::Private(key))
            .unwrap();

        assert_eq!(cert.common_name().as_deref(), Some("ec-device"));
    }

    #[test]
    fn test_subject_values_are_read_whole() {
        let key = generate_rsa_key(1024).unwrap();
        let (not_before, not_after) = window_from(Utc::now().timestamp());

        let cert = CertificateBuilder::new(3, not_before, not_after)
            .with_subject(SubjectField::CommonName, "phone\0backup")
            .with_subject(SubjectField::Organization, "Ärger GmbH")
            .self_signed(&key.into())
            .unwrap();

        assert_eq!(cert.common_name().as_deref(), Some("phone\0backup"));
        assert_eq!(
            cert.subject_entry(SubjectField::Organization).as_deref(),
            Some("Ärger GmbH")
        );
    }

    #[test]
    fn test_fingerprint_format() {
        let fp = fingerprint(b"certificate bytes");
        assert_eq!(fp.len(), 32 * 3 - 1);
        assert_eq!(fp.split(':').count(), 32);
        assert!(fp.chars().all(|c| c == ':' || c.is_ascii_hexdigit()));
        assert_eq!(fp, fp.to_uppercase());
    }

    #[test]
    fn test_device_identity_generate() {
        let identity = DeviceIdentity::generate("device_abc").unwrap();
        let cert = identity.certificate();

        assert_eq!(identity.device_id(), "device_abc");
        assert_eq!(cert.common_name().as_deref(), Some("device_abc"));
        assert_eq!(cert.subject_entry(SubjectField::Organization).as_deref(), Some("KDE"));
        assert_eq!(cert.serial_number(), Some(10));
        assert_eq!(identity.private_key().bits(), RSA_KEY_BITS);

        let now = Utc::now().timestamp();
        assert!(cert.not_before().unwrap() < now);
        assert!(cert.not_after().unwrap() > now + 9 * 365 * 86_400);
    }

    #[test]
    fn test_save_and_load_identity() {
        let dir = TempDir::new().unwrap();
        let cert_path = dir.path().join("certs/certificate.pem");
        let key_path = dir.path().join("certs/private_key.pem");

        let identity = DeviceIdentity::generate("device_saved").unwrap();
        identity.save_to_files(&cert_path, &key_path).unwrap();

        let loaded = DeviceIdentity::load_from_files(&cert_path, &key_path).unwrap();
        assert_eq!(loaded.device_id(), "device_saved");
        assert_eq!(loaded.fingerprint().unwrap(), identity.fingerprint().unwrap());
    }

    #[test]
    fn test_mismatched_key_is_rejected() {
        let identity = DeviceIdentity::generate("device_one").unwrap();
        let other_key = generate_rsa_key(1024).unwrap();

        let result = DeviceIdentity::from_parts(other_key, identity.certificate().clone());
        assert!(matches!(result, Err(ProtocolError::CertificateValidation(_))));
    }
}
