//! Configuration for replicad

use clap::Parser;
use groupcast_net::PortLayout;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// replicad - groupcast replica daemon
#[derive(Parser, Debug, Clone)]
#[command(name = "replicad")]
#[command(about = "groupcast replica: document store, client sessions and gossip")]
pub struct Config {
    /// Base port; service HTTP on base, client sessions on base+1, control on base+2
    #[arg(short, long, env = "REPLICAD_BASE_PORT", default_value = "8080")]
    pub base_port: u16,

    /// Host to bind all listeners on
    #[arg(long, default_value = "0.0.0.0")]
    pub bind_host: IpAddr,

    /// Registration address of the gateway
    #[arg(short, long, env = "REPLICAD_GATEWAY", default_value = "127.0.0.1:8087")]
    pub gateway: SocketAddr,

    /// Data directory for persistent storage
    #[arg(short, long, default_value = "./data/replicad")]
    pub data_dir: PathBuf,

    /// Timeout of each outbound gossip connection in milliseconds
    #[arg(long, default_value = "1000")]
    pub gossip_timeout_ms: u64,

    /// Delay between failed registration attempts in seconds
    #[arg(long, default_value = "5")]
    pub register_retry_secs: u64,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}

impl Config {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.base_port == 0 {
            anyhow::bail!("Base port must be fixed, other ports are derived from it");
        }
        let layout = PortLayout::default();
        if layout.control_port(self.base_port).is_none() {
            anyhow::bail!("Base port {} leaves no room for the control port", self.base_port);
        }
        if self.gossip_timeout_ms == 0 || self.register_retry_secs == 0 {
            anyhow::bail!("Gossip timeout and registration retry must be positive");
        }
        if !matches!(self.log_format.as_str(), "pretty" | "json") {
            anyhow::bail!("Unknown log format {:?}", self.log_format);
        }
        Ok(())
    }

    pub fn service_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_host, self.base_port)
    }

    pub fn session_addr(&self) -> Option<SocketAddr> {
        PortLayout::default()
            .session_port(self.base_port)
            .map(|port| SocketAddr::new(self.bind_host, port))
    }

    pub fn control_addr(&self) -> Option<SocketAddr> {
        PortLayout::default()
            .control_port(self.base_port)
            .map(|port| SocketAddr::new(self.bind_host, port))
    }

    pub fn gossip_timeout(&self) -> Duration {
        Duration::from_millis(self.gossip_timeout_ms)
    }

    pub fn register_retry(&self) -> Duration {
        Duration::from_secs(self.register_retry_secs)
    }
}
