//! `MembershipView`: the K-ring topology derived from a `Configuration`.
//!
//! This is a pure data structure with no protocol logic: given a
//! `Configuration` and a ring count K, it precomputes K circular orderings of
//! the member set (one per ring seed) and exposes the observer/observed
//! lookups every other subsystem reads from. It is recomputed, never
//! mutated, on every view install (Section 9: "no ownership cycle").

use crate::types::{Configuration, Endpoint};
use std::collections::HashMap;

/// The K-ring derived view of a `Configuration`.
///
/// `observers_of` / `observed_by` intentionally stay as two distinct lookup
/// tables even though they are mathematically the inverse of one another
/// (Section 9's "copy-paste bug" note): collapsing them into one shared
/// table would make it easy to silently confuse "who watches me" with "who I
/// watch" at a call site.
#[derive(Debug, Clone)]
pub struct MembershipView {
    ring_count: u32,
    configuration: Configuration,
    /// `rings[k]` is the configuration's member list ordered by `H(seed_k,
    /// endpoint)`, i.e. ring k's circular order.
    rings: Vec<Vec<Endpoint>>,
    /// endpoint -> index of that endpoint within each ring's ordering.
    position_in_ring: Vec<HashMap<Endpoint, usize>>,
}

impl MembershipView {
    pub fn new(ring_count: u32, configuration: Configuration) -> Self {
        let members = &configuration.ordered_members;
        let mut rings = Vec::with_capacity(ring_count as usize);
        let mut position_in_ring = Vec::with_capacity(ring_count as usize);

        for k in 0..ring_count {
            let mut ring: Vec<Endpoint> = members.clone();
            ring.sort_by_key(|e| ring_hash(k, e));
            let positions: HashMap<Endpoint, usize> =
                ring.iter().enumerate().map(|(i, e)| (e.clone(), i)).collect();
            rings.push(ring);
            position_in_ring.push(positions);
        }

        Self { ring_count, configuration, rings, position_in_ring }
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn ring_count(&self) -> u32 {
        self.ring_count
    }

    pub fn members(&self) -> &[Endpoint] {
        &self.configuration.ordered_members
    }

    pub fn size(&self) -> usize {
        self.configuration.size()
    }

    /// The K observers of `endpoint`: on each ring, the predecessor of
    /// `endpoint` in that ring's circular order. Length K, duplicates
    /// preserved (a small membership may place the same predecessor on
    /// several rings; callers tallying per-ring votes need that multiplicity).
    pub fn observers_of(&self, endpoint: &Endpoint) -> Vec<Endpoint> {
        self.neighbor_on_each_ring(endpoint, Direction::Predecessor)
    }

    /// The K observed endpoints of `endpoint`: on each ring, the successor of
    /// `endpoint` in that ring's circular order. Symmetric to
    /// `observers_of` but a distinct lookup, not an alias of it.
    pub fn observed_by(&self, endpoint: &Endpoint) -> Vec<Endpoint> {
        self.neighbor_on_each_ring(endpoint, Direction::Successor)
    }

    fn neighbor_on_each_ring(&self, endpoint: &Endpoint, direction: Direction) -> Vec<Endpoint> {
        let n = self.configuration.size();
        if n <= 1 {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(self.ring_count as usize);
        for k in 0..self.ring_count as usize {
            let Some(&pos) = self.position_in_ring[k].get(endpoint) else {
                continue;
            };
            let ring = &self.rings[k];
            let neighbor_pos = match direction {
                Direction::Predecessor => (pos + n - 1) % n,
                Direction::Successor => (pos + 1) % n,
            };
            out.push(ring[neighbor_pos].clone());
        }
        out
    }
}

enum Direction {
    Predecessor,
    Successor,
}

/// `H(ring_seed_k, endpoint)`: a per-ring hash used purely to order members
/// on that ring. Using the ring index as part of the hash input is what
/// makes the K rings independent pseudo-random orderings of the same set.
fn ring_hash(ring_number: u32, endpoint: &Endpoint) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&ring_number.to_le_bytes());
    hasher.update(endpoint.as_host_port().as_bytes());
    let digest = hasher.finalize();
    let bytes = digest.as_bytes();
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[0..8]);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeId;

    fn configuration(n: usize) -> Configuration {
        let members = (0..n)
            .map(|i| (Endpoint::new("127.0.0.1", 1000 + i as u16), NodeId::generate()))
            .collect();
        Configuration::new(members, Default::default())
    }

    #[test]
    fn every_member_has_k_observers_and_k_observed() {
        let k = 10;
        let config = configuration(20);
        let view = MembershipView::new(k, config);
        for endpoint in view.members() {
            assert_eq!(view.observers_of(endpoint).len(), k as usize);
            assert_eq!(view.observed_by(endpoint).len(), k as usize);
        }
    }

    #[test]
    fn every_member_appears_exactly_once_per_ring() {
        let k = 6;
        let config = configuration(15);
        let view = MembershipView::new(k, config);
        for ring in &view.rings {
            let mut seen = std::collections::HashSet::new();
            for e in ring {
                assert!(seen.insert(e.clone()), "duplicate member on a single ring");
            }
            assert_eq!(ring.len(), 15);
        }
    }

    #[test]
    fn observer_observed_relation_is_symmetric_across_rings() {
        // For every member m and every ring, the predecessor p of m on that
        // ring has m as its successor on that same ring, so the set of m's
        // observers equals the set of n such that m appears in n's observed
        // list.
        let k = 8;
        let config = configuration(12);
        let view = MembershipView::new(k, config);

        for m in view.members() {
            let observers: std::collections::HashSet<_> = view.observers_of(m).into_iter().collect();
            let mut reverse = std::collections::HashSet::new();
            for n in view.members() {
                if view.observed_by(n).contains(m) {
                    reverse.insert(n.clone());
                }
            }
            assert_eq!(observers, reverse);
        }
    }

    #[test]
    fn two_views_from_same_inputs_produce_identical_configuration_id() {
        let members = vec![
            (Endpoint::new("127.0.0.1", 1000), NodeId::generate()),
            (Endpoint::new("127.0.0.1", 1001), NodeId::generate()),
        ];
        let c1 = Configuration::new(members.clone(), Default::default());
        let c2 = Configuration::new(members, Default::default());
        let v1 = MembershipView::new(10, c1);
        let v2 = MembershipView::new(10, c2);
        assert_eq!(v1.configuration().configuration_id, v2.configuration().configuration_id);
    }

    #[test]
    fn single_member_has_no_observers() {
        let view = MembershipView::new(10, configuration(1));
        let only = &view.members()[0];
        assert!(view.observers_of(only).is_empty());
        assert!(view.observed_by(only).is_empty());
    }
}
