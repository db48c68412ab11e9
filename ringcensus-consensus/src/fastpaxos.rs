//! Fast-path agreement: decide in one broadcast round when a quorum of
//! members independently propose the identical sorted endpoint list.

use crate::types::fast_path_quorum_size;
use ringcensus_core::{ConfigurationId, Endpoint, Proposal};
use std::collections::{HashMap, HashSet};

/// Per-configuration fast-path vote tally.
///
/// Tracks, for the single configuration id this instance was created for,
/// which distinct senders proposed which sorted endpoint list. A decision is
/// reached the moment any one endpoint list accumulates votes from a
/// fast-path quorum of distinct senders; Section 4.5's quorum-intersection
/// argument is what guarantees that at most one list can ever do so.
pub struct FastPaxosState {
    config_id: ConfigurationId,
    /// sorted endpoint list -> senders who proposed exactly that list
    votes: HashMap<Vec<Endpoint>, HashSet<Endpoint>>,
    decision: Option<Proposal>,
}

impl FastPaxosState {
    pub fn new(config_id: ConfigurationId) -> Self {
        Self { config_id, votes: HashMap::new(), decision: None }
    }

    pub fn decision(&self) -> Option<&Proposal> {
        self.decision.as_ref()
    }

    /// Registers one member's fast-path proposal. Returns `Some(proposal)`
    /// exactly once, the turn a quorum is first reached; later calls after a
    /// decision is already recorded are no-ops so a replayed vote can never
    /// flip the outcome.
    pub fn register(
        &mut self,
        sender: Endpoint,
        config_id: ConfigurationId,
        hosts: Vec<Endpoint>,
        member_count: usize,
    ) -> Option<Proposal> {
        if self.decision.is_some() || config_id != self.config_id {
            return None;
        }

        let mut sorted = hosts;
        sorted.sort();

        let senders = self.votes.entry(sorted.clone()).or_default();
        senders.insert(sender);

        let quorum = fast_path_quorum_size(member_count);
        if senders.len() >= quorum {
            let proposal = Proposal { config_id: self.config_id, endpoints: sorted };
            self.decision = Some(proposal.clone());
            return Some(proposal);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringcensus_core::ConfigurationId;

    fn endpoints(n: usize) -> Vec<Endpoint> {
        (0..n).map(|i| Endpoint::new("127.0.0.1", 1000 + i as u16)).collect()
    }

    #[test]
    fn decides_once_quorum_of_identical_proposals_arrives() {
        let config_id = ConfigurationId(1);
        let mut state = FastPaxosState::new(config_id);
        let members = endpoints(8); // N=8, quorum = floor(24/4)+1 = 7
        let hosts = vec![Endpoint::new("new", 9000)];

        for m in &members[0..6] {
            assert!(state.register(m.clone(), config_id, hosts.clone(), 8).is_none());
        }
        let decision = state.register(members[6].clone(), config_id, hosts.clone(), 8);
        assert!(decision.is_some());
        assert_eq!(decision.unwrap().endpoints, hosts);
    }

    #[test]
    fn ignores_votes_for_a_different_configuration() {
        let mut state = FastPaxosState::new(ConfigurationId(1));
        let result = state.register(Endpoint::new("a", 1), ConfigurationId(2), vec![], 4);
        assert!(result.is_none());
    }

    #[test]
    fn decision_is_sticky_after_first_quorum() {
        let config_id = ConfigurationId(7);
        let mut state = FastPaxosState::new(config_id);
        let members = endpoints(4); // quorum = floor(12/4)+1 = 4
        let hosts = vec![Endpoint::new("x", 1)];
        for m in &members {
            state.register(m.clone(), config_id, hosts.clone(), 4);
        }
        assert!(state.decision().is_some());
        // A later, different proposal cannot overwrite the sticky decision.
        let other = state.register(Endpoint::new("late", 1), config_id, vec![Endpoint::new("y", 2)], 4);
        assert!(other.is_none());
        assert_eq!(state.decision().unwrap().endpoints, hosts);
    }

    #[test]
    fn distinct_endpoint_lists_never_both_decide() {
        // Two disjoint proposals can each gather votes, but with the
        // fast-path quorum size neither alone can reach quorum while the
        // other is also receiving votes, for N where quorums must overlap.
        let config_id = ConfigurationId(9);
        let mut state = FastPaxosState::new(config_id);
        let n = 8;
        let quorum = fast_path_quorum_size(n);
        let members = endpoints(n);
        let proposal_a = vec![Endpoint::new("a", 1)];
        let proposal_b = vec![Endpoint::new("b", 1)];

        // Split votes: quorum-1 members vote for each of two different
        // proposals -- neither should decide.
        for m in &members[0..quorum - 1] {
            assert!(state.register(m.clone(), config_id, proposal_a.clone(), n).is_none());
        }
        for m in &members[quorum - 1..n] {
            assert!(state.register(m.clone(), config_id, proposal_b.clone(), n).is_none());
        }
        assert!(state.decision().is_none());
    }
}
