//! Gossip fan-out planning
//!
//! A new post leaves the leader replica through two root branches, then every
//! subscriber that sees it for the first time relays it to at most
//! [`RELAY_FANOUT`] peers. A subscriber that has seen the same id
//! [`STOP_AFTER_SIGHTINGS`] times stops relaying it. Coverage is
//! probabilistic; nothing here is acknowledged.
//!
//! These functions only decide who gets what. Sending is done by the
//! disseminator in `groupcast-net`.

use crate::seen::Sighting;
use crate::types::{GossipMessage, MessageId};
use rand::seq::SliceRandom;
use rand::Rng;
use std::net::SocketAddr;

/// Number of direct branches the root contacts
pub const ROOT_BRANCHES: usize = 2;

/// Maximum next hops a relay contacts
pub const RELAY_FANOUT: usize = 4;

/// Relaying stops once an id has been seen this many times
pub const STOP_AFTER_SIGHTINGS: u32 = 2;

/// One message owed to one address
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub to: SocketAddr,
    pub message: GossipMessage,
}

/// Plan the first hop of a gossip wave.
///
/// `targets` are the online subscribers of the group, poster excluded.
/// With at most two targets each gets a leaf message. Otherwise the first
/// two targets become branches, and each branch is handed every target
/// except itself.
pub fn plan_root_fanout(targets: &[SocketAddr], id: MessageId, body: &str) -> Vec<Delivery> {
    if targets.len() <= ROOT_BRANCHES {
        return targets
            .iter()
            .map(|to| Delivery {
                to: *to,
                message: GossipMessage::leaf(id, body),
            })
            .collect();
    }

    (0..ROOT_BRANCHES)
        .map(|branch| {
            let remaining_targets = targets
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != branch)
                .map(|(_, addr)| *addr)
                .collect();
            Delivery {
                to: targets[branch],
                message: GossipMessage {
                    id,
                    body: body.to_string(),
                    remaining_targets,
                },
            }
        })
        .collect()
}

/// Plan the relay of a received message.
///
/// `sighting` is the result of recording this receipt in the local
/// [`crate::SeenTable`]. Returns no deliveries for leaf messages and for ids
/// that have been seen [`STOP_AFTER_SIGHTINGS`] times. Otherwise up to
/// [`RELAY_FANOUT`] next hops are drawn without replacement, and each is told
/// about exactly that next-hop set.
pub fn plan_relay<R: Rng + ?Sized>(
    message: &GossipMessage,
    sighting: Sighting,
    rng: &mut R,
) -> Vec<Delivery> {
    if message.is_leaf() || sighting.count >= STOP_AFTER_SIGHTINGS {
        return Vec::new();
    }

    let next_hops: Vec<SocketAddr> = if message.remaining_targets.len() > RELAY_FANOUT {
        message
            .remaining_targets
            .choose_multiple(rng, RELAY_FANOUT)
            .copied()
            .collect()
    } else {
        message.remaining_targets.clone()
    };

    next_hops
        .iter()
        .map(|to| Delivery {
            to: *to,
            message: GossipMessage {
                id: message.id,
                body: message.body.clone(),
                remaining_targets: next_hops.clone(),
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seen::SeenTable;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::{HashMap, HashSet, VecDeque};

    fn subscribers(n: u16) -> Vec<SocketAddr> {
        (0..n)
            .map(|i| SocketAddr::from(([127, 0, 0, 1], 5000 + i)))
            .collect()
    }

    #[test]
    fn test_root_small_group_gets_leaf_messages() {
        let targets = subscribers(2);
        let plan = plan_root_fanout(&targets, MessageId(7), "hi");

        assert_eq!(plan.len(), 2);
        assert!(plan.iter().all(|d| d.message.is_leaf()));
        assert_eq!(plan[0].to, targets[0]);
        assert_eq!(plan[1].to, targets[1]);

        assert!(plan_root_fanout(&[], MessageId(7), "hi").is_empty());
    }

    #[test]
    fn test_root_branches_exclude_themselves() {
        let targets = subscribers(5);
        let plan = plan_root_fanout(&targets, MessageId(1), "hello");

        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].to, targets[0]);
        assert_eq!(
            plan[0].message.remaining_targets,
            vec![targets[1], targets[2], targets[3], targets[4]]
        );
        assert_eq!(plan[1].to, targets[1]);
        assert_eq!(
            plan[1].message.remaining_targets,
            vec![targets[0], targets[2], targets[3], targets[4]]
        );
    }

    #[test]
    fn test_relay_fanout_bound() {
        let mut rng = StdRng::seed_from_u64(3);
        let first = Sighting { count: 1 };

        for size in 1..=12u16 {
            let pool = subscribers(size);
            let message = GossipMessage {
                id: MessageId(9),
                body: "x".into(),
                remaining_targets: pool.clone(),
            };
            let plan = plan_relay(&message, first, &mut rng);

            assert_eq!(plan.len(), pool.len().min(RELAY_FANOUT));
            let chosen: HashSet<SocketAddr> = plan.iter().map(|d| d.to).collect();
            assert_eq!(chosen.len(), plan.len(), "sampled without replacement");
            assert!(chosen.iter().all(|a| pool.contains(a)));
            for delivery in &plan {
                let told: HashSet<SocketAddr> =
                    delivery.message.remaining_targets.iter().copied().collect();
                assert_eq!(told, chosen);
            }
        }
    }

    #[test]
    fn test_relay_stops() {
        let mut rng = StdRng::seed_from_u64(1);
        let leaf = GossipMessage::leaf(MessageId(1), "x");
        assert!(plan_relay(&leaf, Sighting { count: 1 }, &mut rng).is_empty());

        let message = GossipMessage {
            id: MessageId(1),
            body: "x".into(),
            remaining_targets: subscribers(3),
        };
        assert!(plan_relay(&message, Sighting { count: 2 }, &mut rng).is_empty());
        assert!(plan_relay(&message, Sighting { count: 5 }, &mut rng).is_empty());
    }

    /// Runs a wave over a lossless in-memory network; returns per-node
    /// delivery counts and the number of hops carried.
    fn simulate(targets: &[SocketAddr], seed: u64) -> (HashMap<SocketAddr, u32>, usize) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut tables: HashMap<SocketAddr, SeenTable> = HashMap::new();
        let mut delivered: HashMap<SocketAddr, u32> = HashMap::new();
        let mut queue: VecDeque<Delivery> =
            plan_root_fanout(targets, MessageId(42), "hello").into();
        let mut hops = 0;

        while let Some(delivery) = queue.pop_front() {
            hops += 1;
            assert!(hops < 100_000, "wave did not terminate");

            let table = tables.entry(delivery.to).or_default();
            let sighting = table.observe(delivery.message.id);
            if sighting.is_first() {
                *delivered.entry(delivery.to).or_default() += 1;
            }
            queue.extend(plan_relay(&delivery.message, sighting, &mut rng));
        }
        (delivered, hops)
    }

    #[test]
    fn test_five_subscriber_wave_delivers_once_each() {
        let targets = subscribers(5);
        let (delivered, _) = simulate(&targets, 11);

        assert_eq!(delivered.len(), 5);
        assert!(delivered.values().all(|count| *count == 1));
    }

    #[test]
    fn test_duplicate_delivery_is_suppressed() {
        let mut table = SeenTable::default();
        let mut visible = 0;
        for _ in 0..2 {
            if table.observe(MessageId(42)).is_first() {
                visible += 1;
            }
        }
        assert_eq!(visible, 1);
    }

    #[test]
    fn test_large_waves_terminate() {
        for (n, seed) in [(3u16, 1u64), (8, 2), (40, 3), (200, 4)] {
            let targets = subscribers(n);
            let (delivered, hops) = simulate(&targets, seed);
            assert!(hops > 0);
            assert!(delivered.values().all(|count| *count == 1));
            assert!(delivered.keys().all(|addr| targets.contains(addr)));
        }
    }
}
