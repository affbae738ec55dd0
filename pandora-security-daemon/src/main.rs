mod config;
mod diagnostics;
mod server;

use anyhow::{Context, Result};
use clap::Parser;
use config::Config;
use diagnostics::{BuildInfo, Cli, DiagnosticCommand};
use pandora_security_protocol::{FlossAdapter, SecurityService, SecurityStorageService};
use server::Server;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Load configuration from the CLI path or the default location, applying
/// CLI overrides
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    if let Some(listen) = &cli.listen {
        config.server.listen_address = listen.clone();
    }

    Ok(config)
}

/// Handle diagnostic commands
fn handle_diagnostic_command(cli: &Cli, command: &DiagnosticCommand) -> Result<()> {
    match command {
        DiagnosticCommand::Version { verbose } => {
            BuildInfo::get().display(*verbose);
            Ok(())
        }
        DiagnosticCommand::ShowConfig => {
            let config = load_config(cli)?;
            let path = cli.config.clone().unwrap_or_else(Config::default_path);

            println!("# {}", path.display());
            print!(
                "{}",
                toml::to_string_pretty(&config).context("Failed to serialize config")?
            );
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(command) = &cli.command {
        return handle_diagnostic_command(&cli, command);
    }

    diagnostics::init_logging(&cli).context("Failed to initialize logging")?;

    info!("Starting Pandora security daemon...");

    let config = load_config(&cli)?;
    let listen_addr = config.server.listen_addr()?;

    info!("Configuration loaded");
    info!("HCI index: {}", config.adapter.hci_index);
    info!("Max frame size: {} bytes", config.server.max_frame_size);

    let adapter = Arc::new(
        FlossAdapter::connect(config.adapter.hci_index)
            .await
            .context("Failed to connect to the Floss adapter")?,
    );

    let server = Arc::new(Server::new(
        Arc::new(SecurityService::new(adapter.clone())),
        Arc::new(SecurityStorageService::new()),
        config.server.max_frame_size,
    ));

    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", listen_addr))?;

    info!("Listening on {}", listener.local_addr()?);
    info!("Press Ctrl+C to stop");

    let result = server
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to wait for shutdown signal: {}", e);
            }
            info!("Received shutdown signal");
        })
        .await;

    if let Err(e) = adapter.shutdown().await {
        error!("Error unregistering from Floss: {}", e);
    }

    info!("Daemon shutdown complete");
    result
}
