//! Wire-level message types and the ballot ordering shared by the fast path
//! and the classic-Paxos fallback.

use ringcensus_core::{ConfigurationId, Endpoint, Proposal};
use serde::{Deserialize, Serialize};

/// `(round, proposerId)`, lexicographically ordered as Section 4.5 specifies.
/// `round` compares first so that a strictly later round always outranks an
/// earlier one regardless of which node proposed it; `proposer` only breaks
/// ties between proposers racing in the same round.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ballot {
    pub round: u64,
    pub proposer: Endpoint,
}

impl Ballot {
    pub fn new(round: u64, proposer: Endpoint) -> Self {
        Self { round, proposer }
    }
}

/// Messages exchanged between members while agreeing on one configuration
/// change. `config_id` and `sender` are carried on every variant so a
/// recipient can discard stale traffic without inspecting the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConsensusMessage {
    /// The fast path: "I propose these exact members join/leave."
    FastProposal { sender: Endpoint, config_id: ConfigurationId, hosts: Vec<Endpoint> },
    /// Classic Paxos phase 1a.
    Prepare { sender: Endpoint, config_id: ConfigurationId, ballot: Ballot },
    /// Classic Paxos phase 1b. `accepted` is the acceptor's highest accepted
    /// (ballot, value) pair, if any.
    Promise {
        sender: Endpoint,
        config_id: ConfigurationId,
        ballot: Ballot,
        accepted: Option<(Ballot, Proposal)>,
    },
    /// Classic Paxos phase 2a.
    Propose { sender: Endpoint, config_id: ConfigurationId, ballot: Ballot, value: Proposal },
    /// Classic Paxos phase 2b.
    Accept { sender: Endpoint, config_id: ConfigurationId, ballot: Ballot },
    /// A prepare/propose was rejected because the acceptor has already
    /// promised a higher ballot.
    Nack { sender: Endpoint, config_id: ConfigurationId, ballot: Ballot, promised: Ballot },
}

impl ConsensusMessage {
    pub fn config_id(&self) -> ConfigurationId {
        match self {
            ConsensusMessage::FastProposal { config_id, .. }
            | ConsensusMessage::Prepare { config_id, .. }
            | ConsensusMessage::Promise { config_id, .. }
            | ConsensusMessage::Propose { config_id, .. }
            | ConsensusMessage::Accept { config_id, .. }
            | ConsensusMessage::Nack { config_id, .. } => *config_id,
        }
    }

    pub fn sender(&self) -> &Endpoint {
        match self {
            ConsensusMessage::FastProposal { sender, .. }
            | ConsensusMessage::Prepare { sender, .. }
            | ConsensusMessage::Promise { sender, .. }
            | ConsensusMessage::Propose { sender, .. }
            | ConsensusMessage::Accept { sender, .. }
            | ConsensusMessage::Nack { sender, .. } => sender,
        }
    }
}

/// The smallest fast-path quorum size guaranteeing that any two such
/// quorums intersect in strictly more than N/2 members: `floor(3N/4) + 1`.
pub fn fast_path_quorum_size(n: usize) -> usize {
    (3 * n) / 4 + 1
}

/// Strict majority of `n`, the classic-Paxos accept quorum.
pub fn majority_quorum_size(n: usize) -> usize {
    n / 2 + 1
}
