//! Deterministic leader election
//!
//! The winner is the greatest alive address. Whoever runs the election trusts
//! its own membership view completely; there is no quorum and no exchange of
//! views between observers.

use crate::types::PeerAddress;

/// Elect a leader from an alive set; `None` when nobody is alive.
///
/// The result does not depend on enumeration order.
pub fn elect_leader<'a, I>(alive: I) -> Option<PeerAddress>
where
    I: IntoIterator<Item = &'a PeerAddress>,
{
    alive.into_iter().max().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs(list: &[&str]) -> Vec<PeerAddress> {
        list.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn test_empty_set_has_no_leader() {
        assert_eq!(elect_leader(&Vec::<PeerAddress>::new()), None);
    }

    #[test]
    fn test_highest_address_wins() {
        let alive = addrs(&["10.0.0.1:8082", "10.0.0.2:8082", "10.0.0.3:8082"]);
        assert_eq!(elect_leader(&alive), Some("10.0.0.3:8082".parse().unwrap()));

        let after_failure = addrs(&["10.0.0.1:8082", "10.0.0.2:8082"]);
        assert_eq!(
            elect_leader(&after_failure),
            Some("10.0.0.2:8082".parse().unwrap())
        );
    }

    #[test]
    fn test_order_independent() {
        let forward = addrs(&["10.0.0.2:8080", "10.0.0.7:8080", "10.0.0.5:8080", "10.0.0.7:8070"]);
        let mut reversed = forward.clone();
        reversed.reverse();
        let mut rotated = forward.clone();
        rotated.rotate_left(2);

        let winner = elect_leader(&forward);
        assert_eq!(winner, elect_leader(&reversed));
        assert_eq!(winner, elect_leader(&rotated));
        assert_eq!(winner, Some("10.0.0.7:8080".parse().unwrap()));

        // repeated calls agree
        for _ in 0..10 {
            assert_eq!(elect_leader(&forward), winner);
        }
    }
}
