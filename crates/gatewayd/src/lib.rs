//! gatewayd - groupcast gateway daemon
//!
//! This daemon provides:
//! - Replica membership tracking fed by registrations and health probes
//! - Deterministic leader election and its announcement to replicas
//! - HTTP routing: forward to the leader, best-effort replay to the rest

pub mod config;
pub mod election;
pub mod health;
pub mod membership;
pub mod registration;
pub mod router;
pub mod server;

pub use config::Config;
pub use election::LeaderElector;
pub use health::HealthMonitor;
pub use membership::MembershipTracker;
pub use router::GatewayState;
pub use server::Server;
