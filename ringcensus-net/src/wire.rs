//! Wire message shapes for the protocol's four RPCs (Section 6): join,
//! batched link-update broadcast, consensus, and liveness probe.
//!
//! Every field that crosses the wire is already serde-serializable in
//! `ringcensus-core`/`ringcensus-consensus`; this module only adds the
//! envelope and the join handshake's status-code vocabulary.

use ringcensus_core::{ConfigurationId, Endpoint, LinkUpdate, NodeId};
use ringcensus_consensus::ConsensusMessage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Phase-1 join handshake response codes (Section 4.6's table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    SafeToJoin,
    UuidAlreadyInRing,
    ConfigChanged,
    HostnameAlreadyInRing,
    MembershipRejected,
}

/// Phase-1 (joiner -> seed) and phase-2 (joiner -> each observer) request.
/// `config_id` and `ring_numbers` are only populated for phase 2;
/// `config_id == ConfigurationId::NONE` means "just stream me the current
/// view" (the `HOSTNAME_ALREADY_IN_RING` recovery path).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinMessage {
    pub sender: Endpoint,
    pub uuid: NodeId,
    pub config_id: Option<ConfigurationId>,
    pub ring_numbers: Option<Vec<u32>>,
    pub metadata: Option<BTreeMap<String, String>>,
}

/// Response to both phase-1 and phase-2 join messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinResponse {
    pub sender: Endpoint,
    pub status_code: StatusCode,
    pub config_id: ConfigurationId,
    pub hosts: Vec<Endpoint>,
    pub identifiers: Vec<NodeId>,
    pub cluster_metadata: BTreeMap<String, BTreeMap<String, String>>,
}

/// One failure-detector or join-injected verdict, batched per broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchedLinkUpdateMessage {
    pub sender: Endpoint,
    pub config_id: ConfigurationId,
    pub updates: Vec<LinkUpdate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeMessage {
    pub sender: Endpoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeStatus {
    Ok,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResponse {
    pub status: ProbeStatus,
}

/// Envelope over every message shape a `Transport` carries. `ringcensus-net`
/// is deliberately the only crate that needs to know this enum exists:
/// `ringcensus-service` speaks in the inner types and this module wraps and
/// unwraps them at the transport boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcMessage {
    Join(JoinMessage),
    JoinResponse(JoinResponse),
    LinkUpdateBatch(BatchedLinkUpdateMessage),
    Consensus(ConsensusMessage),
    Probe(ProbeMessage),
    ProbeResponse(ProbeResponse),
}
