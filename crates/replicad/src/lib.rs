//! replicad - groupcast replica daemon
//!
//! This daemon provides:
//! - The document store for users, groups and posts
//! - The HTTP service the gateway forwards client calls to
//! - Client sessions: who is online and where they receive gossip
//! - Leader tracking, and gossip origination while leading

pub mod config;
pub mod handlers;
pub mod leadership;
pub mod server;
pub mod sessions;
pub mod storage;

pub use config::Config;
pub use leadership::LeaderFlag;
pub use server::Server;
pub use sessions::SessionRegistry;
pub use storage::Storage;
