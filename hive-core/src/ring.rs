//! # Consistent Hash Ring
//!
//! Maps keys to peer identities through hashed virtual nodes. Each peer id
//! contributes `replicas` points on the ring (CRC-32 IEEE of the replica
//! index concatenated with the id); a key is owned by the peer whose point
//! is the first at or clockwise of the key's hash. Adding a peer moves
//! only the keys falling into its new arcs.

use ahash::RandomState;
use hashbrown::HashMap;

/// Consistent-hash ring over peer identities.
pub struct Ring {
    replicas: usize,
    /// Sorted virtual node hashes.
    points: Vec<u32>,
    /// Virtual node hash -> peer id.
    owners: HashMap<u32, String, RandomState>,
}

impl Ring {
    /// Creates a ring with `replicas` virtual nodes per peer id.
    pub fn new(replicas: usize) -> Self {
        Ring {
            replicas: replicas.max(1),
            points: Vec::new(),
            owners: HashMap::with_hasher(RandomState::new()),
        }
    }

    /// Returns true when no peers are registered.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Registers peer ids on the ring.
    pub fn add<S: AsRef<str>>(&mut self, ids: &[S]) {
        for id in ids {
            let id = id.as_ref();
            for replica in 0..self.replicas {
                let point = crc32fast::hash(format!("{replica}{id}").as_bytes());
                self.points.push(point);
                self.owners.insert(point, id.to_string());
            }
        }
        self.points.sort_unstable();
        self.points.dedup();
    }

    /// Returns the peer id owning `key`, or `None` on an empty ring.
    pub fn owner(&self, key: &str) -> Option<&str> {
        if self.points.is_empty() {
            return None;
        }
        let hash = crc32fast::hash(key.as_bytes());
        let idx = match self.points.binary_search(&hash) {
            Ok(idx) => idx,
            Err(idx) => idx,
        };
        // Wrap past the last point back to the first.
        let point = self.points[idx % self.points.len()];
        self.owners.get(&point).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_ring_owns_nothing() {
        let ring = Ring::new(3);
        assert!(ring.is_empty());
        assert_eq!(ring.owner("key"), None);
    }

    #[test]
    fn test_ownership_is_deterministic() {
        let build = || {
            let mut ring = Ring::new(50);
            ring.add(&["peer-a", "peer-b", "peer-c"]);
            ring
        };
        let first = build();
        let second = build();
        for i in 0..100 {
            let key = format!("key-{i}");
            assert_eq!(first.owner(&key), second.owner(&key));
        }
    }

    #[test]
    fn test_every_peer_owns_some_keys() {
        let mut ring = Ring::new(50);
        ring.add(&["peer-a", "peer-b", "peer-c"]);

        let mut counts: HashMap<String, usize, RandomState> =
            HashMap::with_hasher(RandomState::new());
        for i in 0..300 {
            let owner = ring.owner(&format!("key-{i}")).unwrap().to_string();
            *counts.entry(owner).or_default() += 1;
        }
        assert_eq!(counts.len(), 3);
        for (_, count) in counts {
            assert!(count > 0);
        }
    }

    #[test]
    fn test_adding_a_peer_moves_bounded_keys() {
        let mut before = Ring::new(50);
        before.add(&["peer-a", "peer-b", "peer-c"]);

        let mut after = Ring::new(50);
        after.add(&["peer-a", "peer-b", "peer-c"]);
        after.add(&["peer-d"]);

        let total = 1_000;
        let mut moved = 0;
        let mut moved_elsewhere = 0;
        for i in 0..total {
            let key = format!("key-{i}");
            let old = before.owner(&key).unwrap();
            let new = after.owner(&key).unwrap();
            if old != new {
                moved += 1;
                if new != "peer-d" {
                    moved_elsewhere += 1;
                }
            }
        }
        // Keys only move onto the new peer, and only a fraction of them.
        assert_eq!(moved_elsewhere, 0);
        assert!(moved > 0);
        assert!(moved < total / 2);
    }
}
