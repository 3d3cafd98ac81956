//! Networking primitives for groupcast
//!
//! This crate provides:
//! - Length-prefixed message framing
//! - Fixed port layout of a replica
//! - Timeout-bounded dial, probe and one-shot send helpers
//! - The gossip disseminator that executes fan-out plans

pub mod disseminator;
pub mod framing;
pub mod peer;
pub mod transport;

pub use disseminator::{DispatchReport, Disseminator};
pub use framing::{Frame, FrameCodec, FrameError, FrameType, MAX_GOSSIP_BODY};
pub use peer::PortLayout;
pub use transport::TransportError;
