//! gatewayd configuration

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

/// gatewayd - groupcast gateway daemon
#[derive(Parser, Debug, Clone)]
#[command(name = "gatewayd")]
#[command(author, version, about = "groupcast gateway: leader routing and replica membership")]
pub struct Config {
    /// Listen address for client HTTP requests
    #[arg(short, long, env = "GATEWAYD_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Listen address for replica registrations
    #[arg(long, env = "GATEWAYD_REGISTRATION", default_value = "0.0.0.0:8087")]
    pub registration: SocketAddr,

    /// Health probe interval in seconds
    #[arg(long, default_value = "5")]
    pub health_interval_secs: u64,

    /// Timeout of a single health probe in milliseconds
    #[arg(long, default_value = "1000")]
    pub probe_timeout_ms: u64,

    /// Timeout of the synchronous forward to the leader in milliseconds
    #[arg(long, default_value = "10000")]
    pub forward_timeout_ms: u64,

    /// Timeout of each background replication request in milliseconds
    #[arg(long, default_value = "5000")]
    pub replication_timeout_ms: u64,

    /// Timeout of each leader announcement in milliseconds
    #[arg(long, default_value = "1000")]
    pub announce_timeout_ms: u64,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}

impl Config {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.listen == self.registration {
            anyhow::bail!("HTTP and registration listeners must use different addresses");
        }
        if self.health_interval_secs == 0 {
            anyhow::bail!("Health interval must be at least one second");
        }
        if self.probe_timeout_ms == 0 || self.announce_timeout_ms == 0 {
            anyhow::bail!("Probe and announce timeouts must be positive");
        }
        if self.forward_timeout_ms == 0 || self.replication_timeout_ms == 0 {
            anyhow::bail!("Forward and replication timeouts must be positive");
        }
        if !matches!(self.log_format.as_str(), "pretty" | "json") {
            anyhow::bail!("Unknown log format {:?}", self.log_format);
        }
        Ok(())
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.forward_timeout_ms)
    }

    pub fn replication_timeout(&self) -> Duration {
        Duration::from_millis(self.replication_timeout_ms)
    }

    pub fn announce_timeout(&self) -> Duration {
        Duration::from_millis(self.announce_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::parse_from(["gatewayd"]);
        assert_eq!(config.listen, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.registration, "0.0.0.0:8087".parse().unwrap());
        assert_eq!(config.health_interval(), Duration::from_secs(5));
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_shared_listener() {
        let config = Config::parse_from([
            "gatewayd",
            "--listen",
            "127.0.0.1:9000",
            "--registration",
            "127.0.0.1:9000",
        ]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_log_format() {
        let config = Config::parse_from(["gatewayd", "--log-format", "xml"]);
        assert!(config.validate().is_err());
    }
}
