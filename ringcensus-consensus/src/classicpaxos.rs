//! Classic Paxos fallback: standard Prepare/Promise/Propose/Accept run when
//! the fast path fails to gather a quorum within its window.
//!
//! One `ClassicPaxosState` plays both the proposer and acceptor role for the
//! local node, which is how a single-threaded protocol loop runs Paxos
//! without a separate acceptor/proposer thread split: the loop drives this
//! state machine purely off incoming `ConsensusMessage`s and its own
//! `start_round` call, emitting outbound messages to broadcast.

use crate::types::{majority_quorum_size, Ballot, ConsensusMessage};
use rand::Rng;
use ringcensus_core::{ConfigurationId, Endpoint, Proposal};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// What a proposer should do after one of its rounds is nacked: wait
/// `after`, then start a fresh round (with a new, epoch-derived round
/// number) re-proposing `value`. `after` is jittered so that two proposers
/// nacked off the same collision don't retry in lockstep (Section 4.5).
#[derive(Debug, Clone)]
pub struct RetryPlan {
    pub after: Duration,
    pub value: Proposal,
}

/// Outcome of feeding one message (or starting a round) into the state
/// machine: zero or more messages to broadcast, and a decision if one was
/// just reached.
#[derive(Debug, Default)]
pub struct StepResult {
    pub outbound: Vec<ConsensusMessage>,
    pub decision: Option<Proposal>,
    pub retry: Option<RetryPlan>,
}

pub struct ClassicPaxosState {
    config_id: ConfigurationId,
    local: Endpoint,
    base_timeout: Duration,

    // Acceptor state.
    promised: Option<Ballot>,
    accepted: Option<(Ballot, Proposal)>,

    // Proposer state, valid only while this node is running a round.
    proposing_ballot: Option<Ballot>,
    proposing_value: Option<Proposal>,
    promises: HashMap<Ballot, HashSet<Endpoint>>,
    highest_promised_value: HashMap<Ballot, Option<(Ballot, Proposal)>>,
    accept_votes: HashMap<Ballot, HashSet<Endpoint>>,
    /// Count of this node's own rounds nacked so far, driving the `2^round`
    /// backoff growth.
    retry_attempt: u32,

    decision: Option<Proposal>,
}

impl ClassicPaxosState {
    pub fn new(config_id: ConfigurationId, local: Endpoint, base_timeout: Duration) -> Self {
        Self {
            config_id,
            local,
            base_timeout,
            promised: None,
            accepted: None,
            proposing_ballot: None,
            proposing_value: None,
            promises: HashMap::new(),
            highest_promised_value: HashMap::new(),
            accept_votes: HashMap::new(),
            retry_attempt: 0,
            decision: None,
        }
    }

    pub fn decision(&self) -> Option<&Proposal> {
        self.decision.as_ref()
    }

    /// Count of this node's own rounds nacked so far; exposed so the
    /// orchestrator can log/inspect retry depth without reaching into
    /// private state.
    pub fn retry_attempt(&self) -> u32 {
        self.retry_attempt
    }

    /// Begins a new round as proposer with the given ballot and initial
    /// value, broadcasting Prepare. `round` must be derived by the caller
    /// from the current epoch (Section 4.5: "the round index is derived
    /// from the current epoch, not attempts") rather than a local retry
    /// counter, so that competing proposers racing after the same fast-path
    /// failure tend to pick the same round and let the ballot's proposer
    /// endpoint break the tie.
    pub fn start_round(&mut self, round: u64, value: Proposal) -> StepResult {
        let ballot = Ballot::new(round, self.local.clone());
        self.proposing_ballot = Some(ballot.clone());
        self.proposing_value = Some(value);
        self.promises.insert(ballot.clone(), HashSet::new());
        self.highest_promised_value.insert(ballot.clone(), None);

        StepResult {
            outbound: vec![ConsensusMessage::Prepare {
                sender: self.local.clone(),
                config_id: self.config_id,
                ballot,
            }],
            decision: None,
            retry: None,
        }
    }

    pub fn handle(&mut self, message: ConsensusMessage, member_count: usize) -> StepResult {
        if message.config_id() != self.config_id {
            return StepResult::default();
        }
        match message {
            ConsensusMessage::Prepare { sender, ballot, .. } => self.on_prepare(sender, ballot),
            ConsensusMessage::Promise { sender, ballot, accepted, .. } => {
                self.on_promise(sender, ballot, accepted, member_count)
            }
            ConsensusMessage::Propose { sender, ballot, value, .. } => self.on_propose(sender, ballot, value),
            ConsensusMessage::Accept { sender, ballot, .. } => self.on_accept(sender, ballot, member_count),
            ConsensusMessage::Nack { ballot, .. } => self.on_nack(ballot),
            ConsensusMessage::FastProposal { .. } => StepResult::default(),
        }
    }

    // --- acceptor role ---

    fn on_prepare(&mut self, sender: Endpoint, ballot: Ballot) -> StepResult {
        if self.promised.as_ref().is_some_and(|p| *p > ballot) {
            return StepResult {
                outbound: vec![ConsensusMessage::Nack {
                    sender: self.local.clone(),
                    config_id: self.config_id,
                    ballot,
                    promised: self.promised.clone().unwrap(),
                }],
                decision: None,
                retry: None,
            };
        }
        self.promised = Some(ballot.clone());
        StepResult {
            outbound: vec![ConsensusMessage::Promise {
                sender: self.local.clone(),
                config_id: self.config_id,
                ballot,
                accepted: self.accepted.clone(),
            }],
            decision: None,
            retry: None,
        }
    }

    fn on_propose(&mut self, sender: Endpoint, ballot: Ballot, value: Proposal) -> StepResult {
        let _ = sender;
        if self.promised.as_ref().is_some_and(|p| *p > ballot) {
            return StepResult {
                outbound: vec![ConsensusMessage::Nack {
                    sender: self.local.clone(),
                    config_id: self.config_id,
                    ballot,
                    promised: self.promised.clone().unwrap(),
                }],
                decision: None,
                retry: None,
            };
        }
        self.promised = Some(ballot.clone());
        self.accepted = Some((ballot.clone(), value));
        StepResult {
            outbound: vec![ConsensusMessage::Accept {
                sender: self.local.clone(),
                config_id: self.config_id,
                ballot,
            }],
            decision: None,
            retry: None,
        }
    }

    // --- proposer role ---

    fn on_promise(
        &mut self,
        sender: Endpoint,
        ballot: Ballot,
        accepted: Option<(Ballot, Proposal)>,
        member_count: usize,
    ) -> StepResult {
        if self.proposing_ballot.as_ref() != Some(&ballot) {
            return StepResult::default();
        }
        let promises = self.promises.entry(ballot.clone()).or_default();
        promises.insert(sender);

        // Paxos's core safety rule: a proposer adopts the value attached to
        // the highest-ballotted accept it has seen among the promises,
        // rather than always pushing its own value through.
        let slot = self.highest_promised_value.entry(ballot.clone()).or_insert(None);
        if let Some((accepted_ballot, accepted_value)) = accepted {
            let adopt = match slot {
                Some((current_ballot, _)) => accepted_ballot > *current_ballot,
                None => true,
            };
            if adopt {
                *slot = Some((accepted_ballot, accepted_value));
            }
        }

        let quorum = majority_quorum_size(member_count);
        if promises.len() < quorum {
            return StepResult::default();
        }

        let value = match self.highest_promised_value.get(&ballot).cloned().flatten() {
            Some((_, v)) => v,
            None => self.proposing_value.clone().expect("start_round always sets a value"),
        };
        // The value just broadcast in `Propose` is the value this round is
        // now actually pushing — including when it was adopted from a peer's
        // earlier accept rather than our own. `on_accept` must decide this
        // value, not whatever `start_round` originally set.
        self.proposing_value = Some(value.clone());

        StepResult {
            outbound: vec![ConsensusMessage::Propose {
                sender: self.local.clone(),
                config_id: self.config_id,
                ballot,
                value,
            }],
            decision: None,
            retry: None,
        }
    }

    fn on_accept(&mut self, sender: Endpoint, ballot: Ballot, member_count: usize) -> StepResult {
        if self.decision.is_some() {
            return StepResult::default();
        }
        let votes = self.accept_votes.entry(ballot.clone()).or_default();
        votes.insert(sender);

        let quorum = majority_quorum_size(member_count);
        if votes.len() < quorum {
            return StepResult::default();
        }

        // Usually this node is the proposer of `ballot` and already knows the
        // value from its own round. But any acceptor that stored `accepted`
        // for this exact ballot via `on_propose` can also tally a majority of
        // `Accept` votes (Section 8's "all nodes converge" property depends
        // on this) — fall back to that when this node isn't the proposer.
        let value = match &self.proposing_value {
            Some(v) if self.proposing_ballot.as_ref() == Some(&ballot) => v.clone(),
            _ => match &self.accepted {
                Some((accepted_ballot, v)) if accepted_ballot == &ballot => v.clone(),
                _ => return StepResult::default(),
            },
        };
        self.decision = Some(value.clone());
        StepResult { outbound: vec![], decision: Some(value), retry: None }
    }

    /// A proposer round of this node's own lost to a higher ballot. Abandon
    /// it and hand back a backoff plan so the caller retries with a fresh
    /// round once the jittered wait elapses, rather than dropping the
    /// message and leaving this node stalled forever.
    fn on_nack(&mut self, ballot: Ballot) -> StepResult {
        if self.proposing_ballot.as_ref() != Some(&ballot) {
            return StepResult::default();
        }
        let value = self.proposing_value.clone().expect("start_round always sets a value");
        self.proposing_ballot = None;
        self.retry_attempt += 1;

        let exponent = self.retry_attempt.min(16);
        let upper = 1u64 << exponent;
        let jitter = rand::thread_rng().gen_range(0..upper);
        let after = self.base_timeout.mul_f64(jitter as f64);

        StepResult { outbound: vec![], decision: None, retry: Some(RetryPlan { after, value }) }
    }
}
