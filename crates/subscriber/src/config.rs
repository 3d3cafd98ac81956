//! subscriber command line

use clap::{Args, Parser, Subcommand};
use groupcast_core::types::PeerAddress;
use std::net::IpAddr;
use std::time::Duration;

/// subscriber - groupcast client
#[derive(Parser, Debug, Clone)]
#[command(name = "subscriber")]
#[command(author, version, about = "groupcast client: group commands and live post feed")]
pub struct Cli {
    /// Base URL of the gateway
    #[arg(long, env = "GROUPCAST_GATEWAY", default_value = "http://127.0.0.1:8080", global = true)]
    pub gateway: String,

    /// Timeout of each gateway request in milliseconds
    #[arg(long, default_value = "10000", global = true)]
    pub request_timeout_ms: u64,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty", global = true)]
    pub log_format: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Register a user, or log in if it exists
    Register { username: String },
    /// List every group
    Groups,
    /// Create a group
    Create { username: String, group: String },
    /// Join a group
    Join { username: String, group: String },
    /// Write a post into a group
    Post {
        username: String,
        group: String,
        body: String,
    },
    /// Go online and print posts of joined groups as they arrive
    Listen(ListenArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ListenArgs {
    pub username: String,

    /// Replica service addresses (comma-separated host:port)
    #[arg(long, value_delimiter = ',', required = true)]
    pub replica: Vec<PeerAddress>,

    /// Host to receive gossip on
    #[arg(long, default_value = "0.0.0.0")]
    pub gossip_host: IpAddr,

    /// Timeout of each outbound relay and handshake in milliseconds
    #[arg(long, default_value = "1000")]
    pub gossip_timeout_ms: u64,
}

impl ListenArgs {
    pub fn gossip_timeout(&self) -> Duration {
        Duration::from_millis(self.gossip_timeout_ms)
    }
}

impl Cli {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.gateway.starts_with("http://") {
            anyhow::bail!("Gateway must be an http:// URL, got {}", self.gateway);
        }
        if self.request_timeout_ms == 0 {
            anyhow::bail!("Request timeout must be positive");
        }
        if !matches!(self.log_format.as_str(), "pretty" | "json") {
            anyhow::bail!("Unknown log format {:?}", self.log_format);
        }
        if let Command::Listen(args) = &self.command {
            if args.username.is_empty() {
                anyhow::bail!("Username cannot be empty");
            }
            if args.gossip_timeout_ms == 0 {
                anyhow::bail!("Gossip timeout must be positive");
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
