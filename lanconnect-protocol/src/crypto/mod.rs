//! Device identity authority
//!
//! Key generation and self-signed certificates used to authenticate TLS
//! links between paired devices.

pub mod certificate;

pub use certificate::{
    fingerprint, generate_rsa_key, Certificate, CertificateBuilder, DeviceIdentity, KeyMaterial,
    SubjectField, RSA_KEY_BITS,
};
