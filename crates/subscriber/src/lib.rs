//! subscriber - groupcast client
//!
//! This crate provides:
//! - Gateway calls for users, groups and posts
//! - Sessions with every replica, so the leader knows where to push posts
//! - The gossip relay every subscriber runs on received posts

pub mod api;
pub mod config;
pub mod relay;
pub mod session;

pub use api::{ClientError, GatewayClient, Login};
pub use config::Cli;
pub use relay::{bind_gossip_listener, Delivered, RelayEngine};
pub use session::SessionLink;
