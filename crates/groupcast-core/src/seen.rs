//! Duplicate suppression for gossip relays
//!
//! Every relaying process counts how often it has seen each message id. The
//! table is bounded in both size and age: entries older than the ttl are
//! dropped, and when the capacity is exceeded the oldest entry goes first.

use crate::types::MessageId;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Default number of ids remembered
pub const DEFAULT_CAPACITY: usize = 4096;

/// Default time an id is remembered
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// Result of observing a message id
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sighting {
    /// Number of times this id has now been seen, including this one
    pub count: u32,
}

impl Sighting {
    /// First sighting: the body should be delivered to the local user
    pub fn is_first(&self) -> bool {
        self.count == 1
    }
}

#[derive(Debug, Clone)]
struct Entry {
    count: u32,
    first_seen: Instant,
}

/// Bounded, ttl-evicting sighting counter keyed by message id
#[derive(Debug)]
pub struct SeenTable {
    entries: HashMap<MessageId, Entry>,
    /// Insertion order, oldest first
    order: VecDeque<(MessageId, Instant)>,
    capacity: usize,
    ttl: Duration,
}

impl Default for SeenTable {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

impl SeenTable {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Record a sighting of `id`
    pub fn observe(&mut self, id: MessageId) -> Sighting {
        self.observe_at(id, Instant::now())
    }

    fn observe_at(&mut self, id: MessageId, now: Instant) -> Sighting {
        self.prune_at(now);

        if let Some(entry) = self.entries.get_mut(&id) {
            entry.count = entry.count.saturating_add(1);
            return Sighting { count: entry.count };
        }

        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some((old, _)) => {
                    self.entries.remove(&old);
                }
                None => break,
            }
        }

        self.entries.insert(
            id,
            Entry {
                count: 1,
                first_seen: now,
            },
        );
        self.order.push_back((id, now));
        Sighting { count: 1 }
    }

    /// Current sighting count for `id` (0 if unknown)
    pub fn count(&self, id: &MessageId) -> u32 {
        self.entries.get(id).map(|e| e.count).unwrap_or(0)
    }

    /// Drop expired entries; returns how many were removed
    pub fn prune(&mut self) -> usize {
        self.prune_at(Instant::now())
    }

    fn prune_at(&mut self, now: Instant) -> usize {
        let mut removed = 0;
        while let Some((id, seen_at)) = self.order.front().copied() {
            if now.duration_since(seen_at) < self.ttl {
                break;
            }
            self.order.pop_front();
            if self
                .entries
                .get(&id)
                .map(|e| e.first_seen == seen_at)
                .unwrap_or(false)
            {
                self.entries.remove(&id);
                removed += 1;
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_is_counted_not_redelivered() {
        let mut table = SeenTable::default();
        let id = MessageId(42);

        let first = table.observe(id);
        assert!(first.is_first());

        let second = table.observe(id);
        assert!(!second.is_first());
        assert_eq!(second.count, 2);
        assert_eq!(table.count(&id), 2);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut table = SeenTable::new(3, DEFAULT_TTL);
        for i in 0..5 {
            table.observe(MessageId(i));
        }
        assert_eq!(table.len(), 3);
        assert_eq!(table.count(&MessageId(0)), 0);
        assert_eq!(table.count(&MessageId(1)), 0);
        assert_eq!(table.count(&MessageId(4)), 1);
    }

    #[test]
    fn test_ttl_expiry() {
        let mut table = SeenTable::new(16, Duration::from_secs(10));
        let start = Instant::now();

        table.observe_at(MessageId(1), start);
        table.observe_at(MessageId(2), start + Duration::from_secs(5));
        assert_eq!(table.len(), 2);

        // id 1 has expired, id 2 has not
        let sighting = table.observe_at(MessageId(1), start + Duration::from_secs(11));
        assert!(sighting.is_first());
        assert_eq!(table.count(&MessageId(2)), 1);

        assert_eq!(table.prune_at(start + Duration::from_secs(30)), 2);
        assert!(table.is_empty());
    }
}
