//! groupcast Core Library
//!
//! This crate provides the data model and the pure decision logic of the
//! groupcast replicated publish/subscribe service. Nothing in here touches the
//! network; the daemons drive these types from their own I/O loops.
//!
//! # Modules
//!
//! - [`types`]: Peer addresses, wire messages and stored documents
//! - [`election`]: Deterministic leader election over an alive set
//! - [`dissemination`]: Root and relay fan-out planning for gossip waves
//! - [`seen`]: Bounded duplicate-suppression table
//! - [`encoding`]: postcard encoding helpers for wire payloads
//! - [`error`]: Error types

pub mod dissemination;
pub mod election;
pub mod encoding;
pub mod error;
pub mod seen;
pub mod types;

pub use dissemination::{plan_relay, plan_root_fanout, Delivery};
pub use election::elect_leader;
pub use error::{Error, Result};
pub use seen::{SeenTable, Sighting};
pub use types::*;
