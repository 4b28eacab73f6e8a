//! Subcommand implementations

use crate::config::Config;
use crate::diagnostics::PeerArgs;
use anyhow::{anyhow, bail, Context, Result};
use lanconnect_protocol::payload::ProgressCallback;
use lanconnect_protocol::{
    identity_packet, Certificate, DeviceIdentity, FileSource, LanLinkProvider, MemoryTrustStore,
    Packet, PayloadClient, UploadJob,
};
use serde_json::json;
use std::fs;
use std::io::Write;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Packet type used to announce a shared file
const SHARE_REQUEST: &str = "kdeconnect.share.request";

/// Generate or load the device identity and report it
pub fn init(config: &mut Config, write_config: bool) -> Result<()> {
    config.ensure_directories()?;
    let configured = config.device.device_id.is_some();
    let device_id = config.resolve_device_id()?;

    let identity = if config.certificate_path().exists() && config.private_key_path().exists() {
        let identity = load_identity(config)?;
        if identity.device_id() != device_id {
            // The certificate common name is the device ID
            if configured {
                bail!(
                    "Configured device ID '{}' does not match certificate '{}'",
                    device_id,
                    identity.device_id()
                );
            }
            warn!(
                "Device ID '{}' does not match certificate, restoring '{}'",
                device_id,
                identity.device_id()
            );
            config.save_device_id(identity.device_id())?;
            config.device.device_id = Some(identity.device_id().to_string());
        }
        identity
    } else {
        let identity = DeviceIdentity::generate(device_id.as_str())
            .context("Failed to generate device identity")?;
        identity
            .save_to_files(config.certificate_path(), config.private_key_path())
            .context("Failed to save device identity")?;
        info!(
            "Saved certificate to {}",
            config.certificate_path().display()
        );
        identity
    };

    if write_config {
        let config_path = config.paths.config_dir.join("config.toml");
        if config_path.exists() {
            info!("Keeping existing config at {}", config_path.display());
        } else {
            let saved = config.save()?;
            info!("Wrote config to {}", saved.display());
        }
    }

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "Device ID:   {}", identity.device_id())?;
    writeln!(stdout, "Certificate: {}", config.certificate_path().display())?;
    writeln!(stdout, "Fingerprint: {}", identity.fingerprint()?)?;
    Ok(())
}

pub fn fingerprint(config: &Config) -> Result<()> {
    let identity = load_identity(config)?;
    println!("{}", identity.fingerprint()?);
    Ok(())
}

/// Print the encoded identity packet
pub fn identity(config: &mut Config) -> Result<()> {
    config.resolve_device_id()?;
    let packet = identity_packet(&*config, &config.plugins);
    let bytes = packet.to_bytes().context("Failed to encode identity packet")?;
    std::io::stdout().write_all(&bytes)?;
    Ok(())
}

/// Serve one file to a paired device
pub async fn send(config: &Config, peer: &PeerArgs, file: &Path) -> Result<()> {
    let identity = load_identity(config)?;
    let (peer_id, provider) = link_provider(&identity, peer)?;

    let source = FileSource::from_path(file)
        .await
        .with_context(|| format!("Cannot send {}", file.display()))?;
    let filename = source.filename.clone();
    let last_modified = source.last_modified;

    let progress: ProgressCallback = Box::new(|transferred, total| {
        debug!("Sent {}/{} bytes", transferred, total);
        true
    });
    let mut job = UploadJob::new(peer_id.as_str(), source, provider)
        .with_port_range(config.network.transfer_ports())
        .with_bind_addr(config.network.bind_address)
        .with_progress(progress);
    let port = job.start().context("Failed to open a payload port")?;

    let mut packet = Packet::new(SHARE_REQUEST, json!({ "filename": filename }))
        .with_payload(job.payload_size(), job.transfer_info()?);
    if let Some(last_modified) = last_modified {
        packet = packet.with_body_field("lastModified", last_modified);
    }

    std::io::stdout().write_all(&packet.to_bytes()?)?;
    std::io::stdout().flush()?;
    info!("Waiting for {} on port {}", peer_id, port);

    let sent = job
        .run()
        .await
        .map_err(|e| anyhow!("Transfer failed (code {}): {}", e.code(), e))?;
    info!("Sent {} bytes of {} to {}", sent, filename, peer_id);
    Ok(())
}

/// Download one payload from a paired device
pub async fn receive(
    config: &Config,
    peer: &PeerArgs,
    host: IpAddr,
    packet: Option<&str>,
    port: Option<u16>,
    size: i64,
    output: &Path,
) -> Result<()> {
    let identity = load_identity(config)?;
    let (peer_id, provider) = link_provider(&identity, peer)?;

    let (port, size) = match packet {
        Some(line) => {
            let packet =
                Packet::from_bytes(line.as_bytes()).context("Failed to decode packet")?;
            let port = packet
                .transfer_port()
                .ok_or_else(|| anyhow!("Packet '{}' carries no payload", packet.packet_type))?;
            (port, packet.payload_size)
        }
        None => match port {
            Some(port) => (port, size),
            None => bail!("Either --packet or --port is required"),
        },
    };

    let client = PayloadClient::connect(SocketAddr::new(host, port), &peer_id, provider.as_ref())
        .await
        .with_context(|| format!("Failed to connect to {}:{}", host, port))?;
    let received = client
        .receive_file(output, size)
        .await
        .with_context(|| format!("Failed to receive payload into {}", output.display()))?;

    info!("Received {} bytes into {}", received, output.display());
    Ok(())
}

pub fn dump_config(config: &Config) -> Result<()> {
    let contents = toml::to_string_pretty(config).context("Failed to serialize config")?;
    print!("{}", contents);
    Ok(())
}

fn load_identity(config: &Config) -> Result<DeviceIdentity> {
    DeviceIdentity::load_from_files(config.certificate_path(), config.private_key_path())
        .with_context(|| {
            format!(
                "No device identity in {} (run `lanconnect init` first)",
                config.paths.cert_dir.display()
            )
        })
}

/// Trust exactly the given peer certificate
fn link_provider(
    identity: &DeviceIdentity,
    peer: &PeerArgs,
) -> Result<(String, Arc<LanLinkProvider>)> {
    let pem = fs::read(&peer.peer_cert)
        .with_context(|| format!("Failed to read {}", peer.peer_cert.display()))?;
    let certificate = Certificate::from_pem(&pem).context("Invalid peer certificate")?;

    let peer_id = match (&peer.peer_id, certificate.common_name()) {
        (Some(id), _) => id.clone(),
        (None, Some(cn)) => cn,
        (None, None) => bail!("Peer certificate has no common name; pass --peer-id"),
    };

    let trust = Arc::new(MemoryTrustStore::new());
    trust.trust(peer_id.as_str(), certificate.x509().clone());

    let provider = LanLinkProvider::new(identity, trust).context("Failed to set up TLS")?;
    Ok((peer_id, Arc::new(provider)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathConfig;
    use tempfile::TempDir;

    fn config_in(dir: &Path) -> Config {
        let mut config = Config::default();
        config.paths = PathConfig {
            config_dir: dir.join("config"),
            data_dir: dir.join("data"),
            cert_dir: dir.join("certs"),
        };
        config
    }

    #[test]
    fn test_init_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(dir.path());

        init(&mut config, true).unwrap();
        let first = load_identity(&config).unwrap();
        assert!(config.paths.config_dir.join("config.toml").exists());

        let mut config = config_in(dir.path());
        init(&mut config, false).unwrap();
        let second = load_identity(&config).unwrap();

        assert_eq!(first.device_id(), second.device_id());
        assert_eq!(first.fingerprint().unwrap(), second.fingerprint().unwrap());
    }

    #[test]
    fn test_init_restores_device_id_from_certificate() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(dir.path());
        init(&mut config, false).unwrap();
        let original = load_identity(&config).unwrap();

        fs::write(config.device_id_path(), "replaced_id").unwrap();

        let mut config = config_in(dir.path());
        init(&mut config, false).unwrap();
        assert_eq!(config.device.device_id.as_deref(), Some(original.device_id()));
        assert_eq!(
            config_in(dir.path()).load_device_id().as_deref(),
            Some(original.device_id())
        );
    }

    #[test]
    fn test_init_rejects_configured_id_mismatch() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(dir.path());
        init(&mut config, false).unwrap();

        let mut config = config_in(dir.path());
        config.device.device_id = Some("someone_else".to_string());
        let error = init(&mut config, false).unwrap_err();
        assert!(error.to_string().contains("does not match certificate"));
    }

    #[test]
    fn test_missing_identity_is_reported() {
        let dir = TempDir::new().unwrap();
        let config = config_in(dir.path());

        let error = load_identity(&config).unwrap_err();
        assert!(error.to_string().contains("lanconnect init"));
    }

    #[test]
    fn test_link_provider_uses_common_name() {
        let dir = TempDir::new().unwrap();
        let identity = DeviceIdentity::generate("local").unwrap();
        let peer = DeviceIdentity::generate("phone_1234").unwrap();

        let peer_cert = dir.path().join("peer.pem");
        fs::write(&peer_cert, peer.certificate().pem()).unwrap();

        let args = PeerArgs {
            peer_cert,
            peer_id: None,
        };
        let (peer_id, _) = link_provider(&identity, &args).unwrap();
        assert_eq!(peer_id, "phone_1234");
    }
}
