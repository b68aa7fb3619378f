//! Prediction Gateway
//!
//! Authenticates every protected request against a short-lived verdict
//! cache and serves per-user prediction history from memory.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use predict_gateway::{
    cli::{Cli, Command},
    config::Config,
    gateway::Gateway,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

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

    match cli.command {
        Some(Command::Config) => print_config(config),
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Print the effective configuration with secrets masked
fn print_config(mut config: Config) -> ExitCode {
    if !config.auth.jwt_secret.starts_with("env:") {
        config.auth.jwt_secret = "***".to_string();
    }
    if let Some(database) = &mut config.history.database
        && !database.url.starts_with("env:")
    {
        database.url = "***".to_string();
    }

    match serde_yaml::to_string(&config) {
        Ok(yaml) => {
            print!("{yaml}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to render configuration: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        remote_validation = config.auth.remote_validation,
        durable_history = config.history.database.is_some(),
        "Starting prediction gateway"
    );

    // Create and run gateway
    let gateway = match Gateway::new(config).await {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Run with graceful shutdown
    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
