mod commands;
mod config;
mod diagnostics;

use anyhow::Result;
use clap::Parser;
use config::Config;
use diagnostics::{init_logging, Cli, Command};
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli) {
        eprintln!("{:#}", e);
        std::process::exit(2);
    }

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Init { write_config } => commands::init(&mut config, write_config),
        Command::Fingerprint => commands::fingerprint(&config),
        Command::Identity => commands::identity(&mut config),
        Command::Send { peer, file } => commands::send(&config, &peer, &file).await,
        Command::Receive {
            peer,
            host,
            packet,
            port,
            size,
            output,
        } => {
            commands::receive(
                &config,
                &peer,
                host,
                packet.as_deref(),
                port,
                size,
                &output,
            )
            .await
        }
        Command::DumpConfig => commands::dump_config(&config),
    }
}
