//! replicad - groupcast replica daemon
//!
//! Stores users, groups and posts, keeps track of online clients and, while
//! it is the leader, pushes new posts to them by gossip.

use clap::Parser;
use replicad::config::Config;
use replicad::server::Server;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse configuration
    let config = Config::parse();

    // Initialize logging
    let filter = EnvFilter::from_default_env().add_directive("replicad=info".parse().unwrap());
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

    info!("replicad v{} - groupcast replica", env!("CARGO_PKG_VERSION"));
    info!("Registering with gateway at {}", config.gateway);

    let server = match Server::new(config) {
        Ok(server) => Arc::new(server),
        Err(e) => {
            error!("Failed to initialize server: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let listeners = match server.bind().await {
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

    if let Err(e) = server.serve(listeners).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
