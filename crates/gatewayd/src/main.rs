//! gatewayd - groupcast gateway daemon
//!
//! Routes client requests to the elected leader replica and keeps the
//! replica membership current.

use clap::Parser;
use gatewayd::config::Config;
use gatewayd::server::Server;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse configuration
    let config = Config::parse();

    // Initialize logging
    let filter = EnvFilter::from_default_env().add_directive("gatewayd=info".parse().unwrap());
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return ExitCode::FAILURE;
    }

    info!("gatewayd v{} - groupcast gateway", env!("CARGO_PKG_VERSION"));

    let server = Arc::new(Server::new(config));
    let (http, registration) = match server.bind().await {
        Ok(listeners) => listeners,
        Err(e) => {
            error!("Failed to start: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Install signal handler
    let signal_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_server.shutdown();
    });

    if let Err(e) = server.serve(http, registration).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
