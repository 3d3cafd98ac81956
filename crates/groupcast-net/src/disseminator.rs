//! Gossip disseminator
//!
//! Executes fan-out plans produced by `groupcast_core::dissemination`. Every
//! delivery is a single attempt over its own one-shot connection. Delivery is
//! at-most-once: failures are logged and dropped, never retried or reported
//! to whoever caused the wave.

use crate::framing::Frame;
use crate::transport;
use futures::future::join_all;
use groupcast_core::dissemination::Delivery;
use std::time::Duration;
use tracing::{debug, warn};

/// Default bound on each outbound gossip connection
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Outcome of one dispatch, for logging only
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub attempted: usize,
    pub delivered: usize,
}

impl DispatchReport {
    pub fn failed(&self) -> usize {
        self.attempted - self.delivered
    }
}

/// Sends gossip deliveries, best effort
#[derive(Debug, Clone)]
pub struct Disseminator {
    send_timeout: Duration,
}

impl Default for Disseminator {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_TIMEOUT)
    }
}

impl Disseminator {
    pub fn new(send_timeout: Duration) -> Self {
        Self { send_timeout }
    }

    /// Send every delivery concurrently; wait for all attempts to finish
    pub async fn dispatch(&self, plan: Vec<Delivery>) -> DispatchReport {
        let attempted = plan.len();
        let sends = plan.into_iter().map(|delivery| self.send(delivery));
        let delivered = join_all(sends).await.into_iter().filter(|ok| *ok).count();

        DispatchReport {
            attempted,
            delivered,
        }
    }

    async fn send(&self, delivery: Delivery) -> bool {
        let to = delivery.to;
        let id = delivery.message.id;
        let frame = match Frame::gossip(&delivery.message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Gossip {} to {} cannot be framed: {}", id, to, e);
                return false;
            }
        };

        match transport::send_frame(to, frame, self.send_timeout).await {
            Ok(()) => true,
            Err(e) => {
                debug!("Gossip {} to {} dropped: {}", id, to, e);
                false
            }
        }
    }
}
