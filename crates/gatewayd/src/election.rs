//! Leader election and announcement
//!
//! The gateway is the single authoritative membership observer: whatever it
//! elects from its own view is what every replica is told. There is no
//! quorum and no cross-checking with other observers.

use crate::membership::MembershipTracker;
use futures::future::join_all;
use groupcast_core::election::elect_leader;
use groupcast_core::types::{LeaderAnnouncement, PeerAddress};
use groupcast_net::transport;
use groupcast_net::{Frame, PortLayout};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Outcome of a single election
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Election {
    pub term: u64,
    pub leader: Option<PeerAddress>,
    pub alive: BTreeSet<PeerAddress>,
}

#[derive(Debug)]
struct ElectionState {
    term: u64,
    leader: Option<PeerAddress>,
}

/// Computes, stores and announces the current leader
pub struct LeaderElector {
    membership: Arc<MembershipTracker>,
    state: RwLock<ElectionState>,
    /// Held from election through announcement
    announcing: Mutex<()>,
    layout: PortLayout,
    announce_timeout: Duration,
}

/// Terms start at wall-clock milliseconds so a restarted gateway keeps
/// announcing terms newer than the ones replicas already hold.
fn initial_term() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

impl LeaderElector {
    pub fn new(
        membership: Arc<MembershipTracker>,
        layout: PortLayout,
        announce_timeout: Duration,
    ) -> Self {
        Self {
            membership,
            state: RwLock::new(ElectionState {
                term: initial_term(),
                leader: None,
            }),
            announcing: Mutex::new(()),
            layout,
            announce_timeout,
        }
    }

    /// Current leader, if any replica is alive
    pub fn leader(&self) -> Option<PeerAddress> {
        self.state.read().leader
    }

    /// Term of the most recent election
    pub fn term(&self) -> u64 {
        self.state.read().term
    }

    /// Recompute the leader from the current alive set and store it under a
    /// fresh term.
    ///
    /// Snapshot and store happen under the state lock, so concurrent
    /// elections store their results in term order.
    pub fn elect(&self) -> Election {
        let mut state = self.state.write();
        let alive = self.membership.snapshot();
        let winner = elect_leader(&alive);
        state.term += 1;

        if state.leader != winner {
            match winner {
                Some(addr) => info!(
                    "Elected leader {} among {} alive (term {})",
                    addr,
                    alive.len(),
                    state.term
                ),
                None => warn!("No alive replicas, leader cleared"),
            }
        }
        state.leader = winner;
        Election {
            term: state.term,
            leader: winner,
            alive,
        }
    }

    /// Elect, then tell every alive replica who won.
    ///
    /// Elections are serialized end to end, so the announcements of one
    /// election are all written before the next election starts.
    pub async fn run_election(&self) -> Option<PeerAddress> {
        let _announcing = self.announcing.lock().await;
        let election = self.elect();
        if let Some(leader) = election.leader {
            let announcement = LeaderAnnouncement {
                term: election.term,
                leader,
            };
            let delivered = self.multicast(announcement, &election.alive).await;
            debug!(
                "Announced leader {} (term {}) to {}/{} replicas",
                leader,
                election.term,
                delivered,
                election.alive.len()
            );
        }
        election.leader
    }

    /// Best-effort announcement; each write is independent and failures
    /// are ignored. Returns how many replicas were reached.
    async fn multicast(&self, announcement: LeaderAnnouncement, alive: &BTreeSet<PeerAddress>) -> usize {
        let frame = match Frame::leader_announce(&announcement) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode leader announcement: {}", e);
                return 0;
            }
        };
        let sends = alive.iter().filter_map(|peer| {
            let control = self.layout.control_addr(peer)?;
            let frame = frame.clone();
            let limit = self.announce_timeout;
            Some(async move {
                match transport::send_frame(control, frame, limit).await {
                    Ok(()) => true,
                    Err(e) => {
                        debug!("Leader announce to {} failed: {}", control, e);
                        false
                    }
                }
            })
        });

        join_all(sends).await.into_iter().filter(|ok| *ok).count()
    }
}
