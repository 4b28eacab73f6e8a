//! Command line and logging
//!
//! Argument parsing for the `lanconnect` tool and the tracing subscriber
//! setup shared by all subcommands. Logs go to stderr so stdout stays
//! reserved for packet and fingerprint output.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::{debug, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// LAN Connect command-line interface
#[derive(Parser, Debug)]
#[command(name = "lanconnect")]
#[command(about = "LAN device-sync protocol tool", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file (defaults to <config dir>/lanconnect/config.toml)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(short, long, value_name = "LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// Enable JSON structured logging
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Peer selection shared by payload commands
#[derive(clap::Args, Debug)]
pub struct PeerArgs {
    /// PEM certificate of the paired peer
    #[arg(long, value_name = "PEM")]
    pub peer_cert: PathBuf,

    /// Peer device ID (defaults to the certificate common name)
    #[arg(long)]
    pub peer_id: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate (or load) this device's ID, key and certificate
    Init {
        /// Write the configuration file if it does not exist yet
        #[arg(long)]
        write_config: bool,
    },

    /// Show the SHA-256 fingerprint of this device's certificate
    Fingerprint,

    /// Print the identity packet this device announces
    Identity,

    /// Serve a file to a paired device
    ///
    /// Prints the announcing packet on stdout and waits for the peer.
    Send {
        #[command(flatten)]
        peer: PeerArgs,

        /// File to send
        file: PathBuf,
    },

    /// Download a payload announced by a paired device
    Receive {
        #[command(flatten)]
        peer: PeerArgs,

        /// Peer address
        #[arg(long)]
        host: IpAddr,

        /// Announcing packet as a JSON line (provides port and size)
        #[arg(long, conflicts_with_all = ["port", "size"])]
        packet: Option<String>,

        /// Payload port
        #[arg(long, required_unless_present = "packet")]
        port: Option<u16>,

        /// Payload size in bytes (-1 reads until the peer closes)
        #[arg(long, default_value = "-1", allow_negative_numbers = true)]
        size: i64,

        /// Where to save the payload
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Show the effective configuration
    DumpConfig,
}

/// Initialize logging based on CLI configuration
pub fn init_logging(cli: &Cli) -> Result<()> {
    let log_level = cli.log_level.parse::<Level>().with_context(|| {
        format!(
            "Invalid log level '{}'. Valid levels: error, warn, info, debug, trace",
            cli.log_level
        )
    })?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level.as_str()))
        .context("Failed to create log filter")?;

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(cli.json_logs)
        .with_line_number(cli.json_logs);

    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    debug!(
        "Logging initialized: level={}, json={}",
        log_level, cli.json_logs
    );
    Ok(())
}
