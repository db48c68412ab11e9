//! `ConsensusEngine`: binds the fast path and the classic-Paxos fallback
//! into the single state machine the protocol loop drives for one active
//! configuration id at a time.
//!
//! Section 4.5's invariant that a decision only ever concerns the
//! configuration it was reached for is enforced structurally here: the
//! orchestrator constructs a fresh engine per view transition, so no state
//! from a prior configuration id can leak into the next one.

use crate::classicpaxos::{ClassicPaxosState, RetryPlan};
use crate::fastpaxos::FastPaxosState;
use crate::types::ConsensusMessage;
use ringcensus_core::{ConfigurationId, Endpoint, Proposal};
use std::time::Duration;
use tracing::{debug, info};

/// Outcome of driving the engine one step: messages to broadcast, and a
/// decision if one was just reached via either path.
#[derive(Debug, Default)]
pub struct EngineStep {
    pub outbound: Vec<ConsensusMessage>,
    pub decision: Option<Proposal>,
    /// Set the turn the fallback is first started, so the orchestrator can
    /// fire its "one-step failed" notification.
    pub fast_path_failed: bool,
    /// Set when one of this node's own classic-Paxos rounds was just nacked:
    /// the orchestrator should wait `retry.after` and then call
    /// [`ConsensusEngine::retry_fallback`] with a fresh, epoch-derived round.
    pub retry: Option<RetryPlan>,
}

pub struct ConsensusEngine {
    config_id: ConfigurationId,
    local: Endpoint,
    fast: FastPaxosState,
    classic: Option<ClassicPaxosState>,
    fallback_started: bool,
    /// This node's own last fast-path proposal, kept only so that a timed-out
    /// fast path has a value to seed the classic-Paxos fallback with.
    last_proposed: Option<Proposal>,
    paxos_base_timeout: Duration,
}

impl ConsensusEngine {
    pub fn new(config_id: ConfigurationId, local: Endpoint, paxos_base_timeout: Duration) -> Self {
        info!(%config_id, "starting consensus engine for new configuration");
        Self {
            config_id,
            local,
            fast: FastPaxosState::new(config_id),
            classic: None,
            fallback_started: false,
            last_proposed: None,
            paxos_base_timeout,
        }
    }

    pub fn config_id(&self) -> ConfigurationId {
        self.config_id
    }

    pub fn has_decided(&self) -> bool {
        self.fast.decision().is_some() || self.classic.as_ref().is_some_and(|c| c.decision().is_some())
    }

    /// The value the fallback should be started with if the fast-path
    /// window elapses: this node's own last proposal, if it made one.
    pub fn fallback_seed_value(&self) -> Option<Proposal> {
        self.last_proposed.clone()
    }

    /// Registers this node's own proposal on the fast path and broadcasts
    /// it as a `FastProposal`.
    pub fn propose(&mut self, value: Proposal, member_count: usize) -> EngineStep {
        debug!(config_id = %self.config_id, hosts = ?value.endpoints, "broadcasting fast-path proposal");
        self.last_proposed = Some(value.clone());
        let mut step = EngineStep {
            outbound: vec![ConsensusMessage::FastProposal {
                sender: self.local.clone(),
                config_id: self.config_id,
                hosts: value.endpoints.clone(),
            }],
            decision: None,
            fast_path_failed: false,
            retry: None,
        };
        if let Some(decision) =
            self.fast.register(self.local.clone(), self.config_id, value.sorted_endpoints(), member_count)
        {
            step.decision = Some(decision);
        }
        step
    }

    pub fn handle(&mut self, message: ConsensusMessage, member_count: usize) -> EngineStep {
        if message.config_id() != self.config_id {
            return EngineStep::default();
        }
        match message {
            ConsensusMessage::FastProposal { sender, hosts, .. } => {
                if self.last_proposed.is_none() {
                    self.last_proposed = Some(Proposal { config_id: self.config_id, endpoints: hosts.clone() });
                }
                let decision = self.fast.register(sender, self.config_id, hosts, member_count);
                EngineStep { outbound: vec![], decision, fast_path_failed: false, retry: None }
            }
            other => {
                let Some(classic) = self.classic.as_mut() else {
                    return EngineStep::default();
                };
                let result = classic.handle(other, member_count);
                EngineStep {
                    outbound: result.outbound,
                    decision: result.decision,
                    fast_path_failed: false,
                    retry: result.retry,
                }
            }
        }
    }

    /// Called when the fast-path window elapses without a decision: starts
    /// classic Paxos. `round` must come from the caller's epoch clock (see
    /// `ClassicPaxosState::start_round`). A no-op once the fast path has
    /// already decided, or once the fallback is already underway.
    pub fn start_fallback(&mut self, round: u64, value: Proposal) -> EngineStep {
        if self.fast.decision().is_some() || self.fallback_started {
            return EngineStep::default();
        }
        self.fallback_started = true;
        info!(config_id = %self.config_id, round, "fast path did not reach quorum, falling back to classic Paxos");
        let mut classic = ClassicPaxosState::new(self.config_id, self.local.clone(), self.paxos_base_timeout);
        let result = classic.start_round(round, value);
        self.classic = Some(classic);
        EngineStep { outbound: result.outbound, decision: None, fast_path_failed: true, retry: None }
    }

    /// Restarts the classic-Paxos round after a nacked round's backoff has
    /// elapsed, reusing the acceptor/decision state already accumulated by
    /// this node's `ClassicPaxosState` rather than starting fallback over.
    /// A no-op if fallback was never started or already decided.
    pub fn retry_fallback(&mut self, round: u64, value: Proposal) -> EngineStep {
        let Some(classic) = self.classic.as_mut() else {
            return EngineStep::default();
        };
        if classic.decision().is_some() {
            return EngineStep::default();
        }
        let result = classic.start_round(round, value);
        EngineStep { outbound: result.outbound, decision: None, fast_path_failed: false, retry: None }
    }

    /// How many of this node's own classic-Paxos rounds have been nacked so
    /// far, for computing the next backoff exponent.
    pub fn classic_retry_attempt(&self) -> u32 {
        self.classic.as_ref().map_or(0, |c| c.retry_attempt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringcensus_core::ConfigurationId;

    #[test]
    fn fast_path_decision_short_circuits_fallback() {
        let config_id = ConfigurationId(1);
        let local = Endpoint::new("self", 1);
        let mut engine = ConsensusEngine::new(config_id, local.clone(), Duration::from_millis(500));
        let value = Proposal { config_id, endpoints: vec![Endpoint::new("j", 1)] };

        // N=4, quorum = 4.
        engine.propose(value.clone(), 4);
        for peer in ["p1", "p2", "p3"] {
            let step = engine.handle(
                ConsensusMessage::FastProposal {
                    sender: Endpoint::new(peer, 1),
                    config_id,
                    hosts: value.endpoints.clone(),
                },
                4,
            );
            if step.decision.is_some() {
                assert!(engine.has_decided());
                return;
            }
        }
        panic!("expected fast-path decision");
    }

    #[test]
    fn fallback_only_starts_once() {
        let config_id = ConfigurationId(2);
        let mut engine = ConsensusEngine::new(config_id, Endpoint::new("self", 1), Duration::from_millis(500));
        let value = Proposal { config_id, endpoints: vec![Endpoint::new("j", 1)] };
        let first = engine.start_fallback(7, value.clone());
        assert!(!first.outbound.is_empty());
        let second = engine.start_fallback(7, value);
        assert!(second.outbound.is_empty());
    }
}
