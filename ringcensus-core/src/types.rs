//! Core data types for the membership protocol: `Endpoint`, `NodeId`,
//! `Configuration`, and the edge-level vocabulary (`EdgeStatus`, `LinkUpdate`,
//! `Proposal`) that flows between the failure detector, the watermark buffer
//! and consensus.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A (host, port) pair uniquely identifying a process on the network.
///
/// Endpoints are totally ordered by their string form (`host:port`), which is
/// the tie-breaking order used to build ring orderings and to sort member
/// lists for display and hashing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    /// Parses `"host:port"`. The host portion may itself contain no colons
    /// (IPv6 literals are out of scope for this fragment).
    pub fn parse(s: &str) -> Option<Self> {
        let (host, port) = s.rsplit_once(':')?;
        let port: u16 = port.parse().ok()?;
        Some(Self { host: host.to_string(), port })
    }

    /// Canonical `host:port` form, the serialization used on the wire.
    pub fn as_host_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_host_port())
    }
}

impl PartialOrd for Endpoint {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Endpoint {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_host_port().cmp(&other.as_host_port())
    }
}

/// An opaque 128-bit identifier assigned to a node at join time.
///
/// Two processes that happen to share an `Endpoint` across a crash-restart
/// are distinguished by their `NodeId`: the new incarnation picks a fresh
/// one, so stale messages addressed to the old incarnation's id can be
/// recognized and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Canonical 36-character textual form used on the wire.
    pub fn as_canonical(&self) -> String {
        self.0.to_string()
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_canonical())
    }
}

/// A single ring-specific health verdict an observer holds about an
/// observed endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeStatus {
    Up,
    Down,
}

/// One entry of a `BatchedLinkUpdateMessage`: an observer's verdict about an
/// observed endpoint on a specific ring, tagged with the configuration it
/// was generated against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkUpdate {
    pub observer: Endpoint,
    pub observed: Endpoint,
    pub ring_number: u32,
    pub status: EdgeStatus,
    pub config_id: ConfigurationId,
}

/// A 64-bit hash over a member set, carried by every protocol message as the
/// version number of the `Configuration` it was produced against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigurationId(pub u64);

impl fmt::Display for ConfigurationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl ConfigurationId {
    /// Sentinel used by phase-2 join messages meaning "just stream me the
    /// current view" (Section 4.6, `HOSTNAME_ALREADY_IN_RING` recovery path).
    /// Represented out-of-band rather than as a real hash value.
    pub const NONE: ConfigurationId = ConfigurationId(u64::MAX);
}

/// An immutable, versioned catalog of cluster member identities.
///
/// `Configuration` itself carries only the flat data; the K-ring derived
/// views (observer/observed lookups) are computed by `MembershipView` so
/// that this type stays a cheap, cloneable value the protocol loop can hand
/// out as a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub configuration_id: ConfigurationId,
    /// Members sorted by endpoint string form.
    pub ordered_members: Vec<Endpoint>,
    /// Node ids positional with `ordered_members`.
    pub member_ids: Vec<NodeId>,
    pub metadata: std::collections::BTreeMap<String, std::collections::BTreeMap<String, String>>,
}

impl Configuration {
    /// Builds a configuration from unordered (endpoint, node id) pairs,
    /// sorting members and deriving the configuration id as specified in
    /// Section 3: a stable hash of (sorted member ids, sorted endpoints).
    pub fn new(
        mut members: Vec<(Endpoint, NodeId)>,
        metadata: std::collections::BTreeMap<String, std::collections::BTreeMap<String, String>>,
    ) -> Self {
        members.sort_by(|a, b| a.0.cmp(&b.0));
        let ordered_members: Vec<Endpoint> = members.iter().map(|(e, _)| e.clone()).collect();
        let member_ids: Vec<NodeId> = members.iter().map(|(_, id)| *id).collect();
        let configuration_id = compute_configuration_id(&ordered_members, &member_ids);
        Self { configuration_id, ordered_members, member_ids, metadata }
    }

    pub fn size(&self) -> usize {
        self.ordered_members.len()
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.ordered_members.contains(endpoint)
    }

    pub fn node_id_of(&self, endpoint: &Endpoint) -> Option<NodeId> {
        self.ordered_members
            .iter()
            .position(|e| e == endpoint)
            .map(|idx| self.member_ids[idx])
    }
}

/// Deterministically derives the `NodeId` a newly admitted member is given
/// in the configuration transitioning away from `based_on`.
///
/// The join handshake lets a joiner request a fresh random `NodeId` for
/// itself (Section 4.6), but that request is only ever seen by the handful
/// of nodes it directly contacts. Every member votes on a decided
/// `Proposal` that carries endpoints only (Section 6's `ConsensusProposal`
/// has no identifier field), so the rest of the cluster has no channel to
/// learn a randomly chosen id through. Deriving the id from `(endpoint,
/// based_on)` instead lets every member compute the identical
/// `Configuration` — and therefore the identical `configurationId` — from
/// the decided proposal alone, with no extra wire traffic. The tradeoff:
/// the random id a joiner names in its own `JoinMessage` is advisory, and a
/// node that crashes and rejoins at the same endpoint before the
/// configuration changes again is not distinguished from its prior
/// incarnation by this derived id alone.
pub fn derive_member_id(endpoint: &Endpoint, based_on: ConfigurationId) -> NodeId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(endpoint.as_host_port().as_bytes());
    hasher.update(&based_on.0.to_le_bytes());
    let digest = hasher.finalize();
    let bytes = digest.as_bytes();
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&bytes[0..16]);
    NodeId(Uuid::from_bytes(buf))
}

/// Hashes `(sorted member ids, sorted endpoints)` into a stable 64-bit
/// configuration id. `blake3` gives us a hash that is identical across
/// platforms and process restarts, which is required for two views built
/// from the same inputs to produce byte-identical ids.
fn compute_configuration_id(ordered_members: &[Endpoint], member_ids: &[NodeId]) -> ConfigurationId {
    let mut hasher = blake3::Hasher::new();
    let mut sorted_ids: Vec<NodeId> = member_ids.to_vec();
    sorted_ids.sort_by_key(|id| id.0);
    for id in &sorted_ids {
        hasher.update(id.0.as_bytes());
    }
    for endpoint in ordered_members {
        hasher.update(endpoint.as_host_port().as_bytes());
    }
    let digest = hasher.finalize();
    let bytes = digest.as_bytes();
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[0..8]);
    ConfigurationId(u64::from_le_bytes(buf))
}

/// An ordered set of endpoints slated for atomic admission (joiners) and/or
/// removal (departers) in the next configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub config_id: ConfigurationId,
    pub endpoints: Vec<Endpoint>,
}

impl Proposal {
    /// Sorted endpoint list, the canonical form compared for fast-path
    /// agreement (`ConsensusProposal.hosts`).
    pub fn sorted_endpoints(&self) -> Vec<Endpoint> {
        let mut v = self.endpoints.clone();
        v.sort();
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_parses_host_port() {
        let e = Endpoint::parse("127.0.0.1:1000").unwrap();
        assert_eq!(e.host, "127.0.0.1");
        assert_eq!(e.port, 1000);
        assert_eq!(e.as_host_port(), "127.0.0.1:1000");
    }

    #[test]
    fn endpoint_ordering_is_by_string_form() {
        let a = Endpoint::new("10.0.0.1", 2000);
        let b = Endpoint::new("10.0.0.1", 3000);
        // Same host: ordering falls back to the port inside the string form.
        assert!(a < b);
        // Lexicographic string comparison, not numeric host comparison:
        // '9' sorts after '1' as a byte, so "9.x" sorts after "10.x".
        let c = Endpoint::new("9.0.0.1", 1000);
        assert!(a < c);
    }

    #[test]
    fn configuration_id_is_deterministic_and_order_independent() {
        let n1 = NodeId::generate();
        let n2 = NodeId::generate();
        let e1 = Endpoint::new("127.0.0.1", 1000);
        let e2 = Endpoint::new("127.0.0.1", 1001);

        let c1 = Configuration::new(
            vec![(e1.clone(), n1), (e2.clone(), n2)],
            Default::default(),
        );
        let c2 = Configuration::new(
            vec![(e2, n2), (e1, n1)],
            Default::default(),
        );

        assert_eq!(c1.configuration_id, c2.configuration_id);
        assert_eq!(c1.ordered_members, c2.ordered_members);
    }

    #[test]
    fn configuration_id_changes_with_membership() {
        let n1 = NodeId::generate();
        let n2 = NodeId::generate();
        let e1 = Endpoint::new("127.0.0.1", 1000);
        let e2 = Endpoint::new("127.0.0.1", 1001);

        let c1 = Configuration::new(vec![(e1.clone(), n1)], Default::default());
        let c2 = Configuration::new(vec![(e1, n1), (e2, n2)], Default::default());

        assert_ne!(c1.configuration_id, c2.configuration_id);
    }

    #[test]
    fn node_id_round_trips_through_canonical_text() {
        let id = NodeId::generate();
        let text = id.as_canonical();
        assert_eq!(text.len(), 36);
        assert_eq!(NodeId::parse(&text), Some(id));
    }

    #[test]
    fn proposal_sorts_endpoints_deterministically() {
        let p = Proposal {
            config_id: ConfigurationId(1),
            endpoints: vec![Endpoint::new("b", 1), Endpoint::new("a", 1)],
        };
        let sorted = p.sorted_endpoints();
        assert_eq!(sorted, vec![Endpoint::new("a", 1), Endpoint::new("b", 1)]);
    }
}
