//! Replica membership tracking
//!
//! Holds every replica that ever registered and whether it is currently
//! considered alive. All transitions go through one lock, so a snapshot is
//! never torn.

use groupcast_core::types::{PeerAddress, PeerStatus};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

/// Result of a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// First time this address registered
    Added,
    /// Address was known but dead; it is alive again
    Revived,
    /// Address was already alive
    Unchanged,
}

impl Admission {
    pub fn changed(&self) -> bool {
        !matches!(self, Admission::Unchanged)
    }
}

/// Tracked replica
#[derive(Debug, Clone)]
pub struct Member {
    pub status: PeerStatus,
    /// When the replica first registered
    pub joined_at: Instant,
    /// Last status transition
    pub changed_at: Instant,
}

/// Membership set keyed by replica address
#[derive(Debug, Default)]
pub struct MembershipTracker {
    members: Mutex<HashMap<PeerAddress, Member>>,
}

impl MembershipTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a replica whose registration connection was accepted
    pub fn add_peer(&self, addr: PeerAddress) -> Admission {
        let now = Instant::now();
        let mut members = self.members.lock();
        match members.get_mut(&addr) {
            None => {
                members.insert(
                    addr,
                    Member {
                        status: PeerStatus::Alive,
                        joined_at: now,
                        changed_at: now,
                    },
                );
                Admission::Added
            }
            Some(member) if member.status == PeerStatus::Dead => {
                member.status = PeerStatus::Alive;
                member.changed_at = now;
                Admission::Revived
            }
            Some(_) => Admission::Unchanged,
        }
    }

    /// Flip a replica to dead; returns true if it was alive
    pub fn mark_dead(&self, addr: &PeerAddress) -> bool {
        self.transition(addr, PeerStatus::Dead)
    }

    /// Flip a replica to alive; returns true if it was dead
    pub fn mark_alive(&self, addr: &PeerAddress) -> bool {
        self.transition(addr, PeerStatus::Alive)
    }

    fn transition(&self, addr: &PeerAddress, to: PeerStatus) -> bool {
        let mut members = self.members.lock();
        match members.get_mut(addr) {
            Some(member) if member.status != to => {
                member.status = to;
                member.changed_at = Instant::now();
                true
            }
            _ => false,
        }
    }

    /// Alive replicas, in election order
    pub fn snapshot(&self) -> BTreeSet<PeerAddress> {
        self.members
            .lock()
            .iter()
            .filter(|(_, m)| m.status == PeerStatus::Alive)
            .map(|(addr, _)| *addr)
            .collect()
    }

    /// Every tracked replica with its status
    pub fn tracked(&self) -> Vec<(PeerAddress, PeerStatus)> {
        let mut all: Vec<_> = self
            .members
            .lock()
            .iter()
            .map(|(addr, m)| (*addr, m.status))
            .collect();
        all.sort_by_key(|(addr, _)| *addr);
        all
    }

    pub fn status(&self, addr: &PeerAddress) -> Option<PeerStatus> {
        self.members.lock().get(addr).map(|m| m.status)
    }

    pub fn len(&self) -> usize {
        self.members.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.lock().is_empty()
    }

    pub fn stats(&self) -> MembershipStats {
        let members = self.members.lock();
        let alive = members
            .values()
            .filter(|m| m.status == PeerStatus::Alive)
            .count();
        MembershipStats {
            total: members.len(),
            alive,
            dead: members.len() - alive,
        }
    }
}

/// Membership statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MembershipStats {
    pub total: usize,
    pub alive: usize,
    pub dead: usize,
}
