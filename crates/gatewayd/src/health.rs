//! Replica health monitoring
//!
//! Every interval each tracked replica's control port is probed with a bare
//! connect. A failing alive replica is marked dead, a reachable dead one is
//! marked alive, and either transition triggers a new election. Probes run
//! sequentially, so one round takes at most `probe_timeout × replicas`.

use crate::election::LeaderElector;
use crate::membership::MembershipTracker;
use groupcast_core::types::PeerStatus;
use groupcast_net::transport;
use groupcast_net::PortLayout;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Periodic prober driving membership transitions
pub struct HealthMonitor {
    membership: Arc<MembershipTracker>,
    elector: Arc<LeaderElector>,
    layout: PortLayout,
    interval: Duration,
    probe_timeout: Duration,
}

impl HealthMonitor {
    pub fn new(
        membership: Arc<MembershipTracker>,
        elector: Arc<LeaderElector>,
        layout: PortLayout,
        interval: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            membership,
            elector,
            layout,
            interval,
            probe_timeout,
        }
    }

    /// Probe loop; returns when `shutdown` fires
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let changed = self.check_once().await;
                    if changed > 0 {
                        debug!("Health round changed {} replicas", changed);
                    }
                }
                _ = shutdown.recv() => {
                    break;
                }
            }
        }
    }

    /// One probing round; returns the number of status transitions
    pub async fn check_once(&self) -> usize {
        let tracked = self.membership.tracked();
        let worst_case = worst_case_round(self.probe_timeout, tracked.len());
        if worst_case >= self.interval {
            warn!(
                "Probing {} replicas may take {:?}, longer than the {:?} interval",
                tracked.len(),
                worst_case,
                self.interval
            );
        }

        let mut changed = 0;
        for (peer, status) in tracked {
            let Some(control) = self.layout.control_addr(&peer) else {
                continue;
            };
            let reachable = transport::probe(control, self.probe_timeout).await;

            match (status, reachable) {
                (PeerStatus::Alive, false) => {
                    if self.membership.mark_dead(&peer) {
                        warn!("Replica {} went down, triggering leader election", peer);
                        changed += 1;
                        self.elector.run_election().await;
                    }
                }
                (PeerStatus::Dead, true) => {
                    if self.membership.mark_alive(&peer) {
                        info!("Replica {} recovered, triggering leader election", peer);
                        changed += 1;
                        self.elector.run_election().await;
                    }
                }
                _ => {}
            }
        }
        changed
    }
}

/// Upper bound on one sequential probing round
fn worst_case_round(probe_timeout: Duration, peers: usize) -> Duration {
    probe_timeout.saturating_mul(u32::try_from(peers).unwrap_or(u32::MAX))
}
