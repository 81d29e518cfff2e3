//! AgenShield daemon - central policy enforcement point for AI agent hosts

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use agenshield::{cli::Cli, config::Config, daemon::Daemon, setup_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    // Load configuration
    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        policies = config.policies.len(),
        "Starting AgenShield daemon"
    );

    let daemon = Daemon::new(config);

    if let Err(e) = daemon.run().await {
        error!("Daemon error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Daemon exited");
    ExitCode::SUCCESS
}
