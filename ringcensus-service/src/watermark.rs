//! Watermark-buffer aggregation (Section 4.2): the failure-detector and
//! join-injected link updates that flow in from every node's independent
//! observation must be aggregated into a stable proposal before consensus
//! ever sees them. This is what keeps a single flaky link from starting a
//! view change.

use ringcensus_core::{ConfigurationId, EdgeStatus, Endpoint, LinkUpdate, Proposal};
use std::collections::{HashMap, HashSet};

/// Per-configuration aggregation state. A fresh buffer is installed every
/// time a new `Configuration` is published (Section 4.7 step 2); it never
/// outlives the configuration it was built for.
pub struct WatermarkBuffer {
    low_watermark: u32,
    high_watermark: u32,
    config_id: ConfigurationId,
    /// Distinct ring numbers that have reported a change for this endpoint.
    rings_reported: HashMap<Endpoint, HashSet<u32>>,
    /// Last status carried by any report for this endpoint; used only to
    /// let the caller tell joins from departures, not by the aggregation
    /// rule itself.
    last_status: HashMap<Endpoint, EdgeStatus>,
    /// Endpoints whose report count has reached `low_watermark`.
    above_low: HashSet<Endpoint>,
    /// Endpoints whose report count has reached `high_watermark` — the
    /// pending proposal set.
    above_high: HashSet<Endpoint>,
    emitted: bool,
}

impl WatermarkBuffer {
    pub fn new(low_watermark: u32, high_watermark: u32, config_id: ConfigurationId) -> Self {
        Self {
            low_watermark,
            high_watermark,
            config_id,
            rings_reported: HashMap::new(),
            last_status: HashMap::new(),
            above_low: HashSet::new(),
            above_high: HashSet::new(),
            emitted: false,
        }
    }

    pub fn config_id(&self) -> ConfigurationId {
        self.config_id
    }

    pub fn last_status_of(&self, endpoint: &Endpoint) -> Option<EdgeStatus> {
        self.last_status.get(endpoint).copied()
    }

    /// Feeds one observer's verdict into the buffer. `members` is the
    /// current configuration's member list: reports about a non-member are
    /// dropped silently (Section 4.2, "Failure semantics").
    ///
    /// Returns the aggregated `Proposal` the instant the emit-decision rule
    /// first fires: the set of endpoints at or above `low_watermark` equals
    /// the set at or above `high_watermark` (no endpoint left in the
    /// unstable zone between the two), and that set is non-empty. The
    /// buffer freezes after emitting — Section 4.2 requires one proposal per
    /// configuration — so later reports are accepted idempotently but never
    /// produce a second proposal.
    pub fn report(&mut self, update: &LinkUpdate, members: &[Endpoint]) -> Option<Proposal> {
        if update.config_id != self.config_id || self.emitted {
            return None;
        }
        if !members.contains(&update.observed) {
            return None;
        }

        let rings = self.rings_reported.entry(update.observed.clone()).or_default();
        rings.insert(update.ring_number);
        self.last_status.insert(update.observed.clone(), update.status);
        let count = rings.len() as u32;

        if count >= self.low_watermark {
            self.above_low.insert(update.observed.clone());
        }
        if count >= self.high_watermark {
            self.above_high.insert(update.observed.clone());
        }

        if !self.above_high.is_empty() && self.above_low == self.above_high {
            self.emitted = true;
            let mut endpoints: Vec<Endpoint> = self.above_high.iter().cloned().collect();
            endpoints.sort();
            return Some(Proposal { config_id: self.config_id, endpoints });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(observed: &Endpoint, ring: u32, status: EdgeStatus, config_id: ConfigurationId) -> LinkUpdate {
        LinkUpdate {
            observer: Endpoint::new("observer", 1),
            observed: observed.clone(),
            ring_number: ring,
            status,
            config_id,
        }
    }

    #[test]
    fn no_proposal_until_high_watermark_reached() {
        let config_id = ConfigurationId(1);
        let target = Endpoint::new("flaky", 9000);
        let members = vec![target.clone()];
        let mut buffer = WatermarkBuffer::new(4, 9, config_id);

        for ring in 0..8 {
            let result = buffer.report(&update(&target, ring, EdgeStatus::Down, config_id), &members);
            assert!(result.is_none(), "should not propose before H reports");
        }
    }

    #[test]
    fn proposes_once_every_member_above_l_is_also_above_h() {
        let config_id = ConfigurationId(2);
        let target = Endpoint::new("dead", 9000);
        let members = vec![target.clone()];
        let mut buffer = WatermarkBuffer::new(4, 9, config_id);

        let mut decision = None;
        for ring in 0..9 {
            decision = buffer.report(&update(&target, ring, EdgeStatus::Down, config_id), &members);
        }
        let proposal = decision.expect("9th distinct ring report should trigger the proposal");
        assert_eq!(proposal.endpoints, vec![target]);
    }

    #[test]
    fn duplicate_reports_from_same_ring_are_idempotent() {
        let config_id = ConfigurationId(3);
        let target = Endpoint::new("dead", 9000);
        let members = vec![target.clone()];
        let mut buffer = WatermarkBuffer::new(2, 3, config_id);

        buffer.report(&update(&target, 0, EdgeStatus::Down, config_id), &members);
        buffer.report(&update(&target, 0, EdgeStatus::Down, config_id), &members);
        buffer.report(&update(&target, 0, EdgeStatus::Down, config_id), &members);
        assert!(buffer.last_status_of(&target).is_some());
        // Still only one distinct ring recorded; far from L=2.
        let result = buffer.report(&update(&target, 0, EdgeStatus::Down, config_id), &members);
        assert!(result.is_none());
    }

    #[test]
    fn reordered_reports_for_the_same_multiset_produce_the_same_proposal() {
        let config_id = ConfigurationId(4);
        let a = Endpoint::new("a", 1);
        let b = Endpoint::new("b", 1);
        let members = vec![a.clone(), b.clone()];

        let order1 = [(&a, 0u32), (&b, 0), (&a, 1), (&b, 1), (&a, 2), (&b, 2)];
        let mut order2 = order1;
        order2.reverse();

        let run = |order: &[(&Endpoint, u32)]| {
            let mut buffer = WatermarkBuffer::new(2, 3, config_id);
            let mut decision = None;
            for (endpoint, ring) in order {
                if let Some(d) = buffer.report(&update(endpoint, *ring, EdgeStatus::Down, config_id), &members) {
                    decision = Some(d);
                }
            }
            decision
        };

        // Neither order reaches H=3 reports per endpoint (only 3 rings used),
        // so both must agree there is still no decision.
        assert_eq!(run(&order1), run(&order2));
    }

    #[test]
    fn reports_for_a_non_member_are_dropped() {
        let config_id = ConfigurationId(5);
        let member = Endpoint::new("member", 1);
        let stranger = Endpoint::new("stranger", 1);
        let mut buffer = WatermarkBuffer::new(1, 1, config_id);
        let result = buffer.report(&update(&stranger, 0, EdgeStatus::Down, config_id), &[member]);
        assert!(result.is_none());
    }

    #[test]
    fn reports_for_a_stale_configuration_are_ignored() {
        let config_id = ConfigurationId(6);
        let member = Endpoint::new("member", 1);
        let mut buffer = WatermarkBuffer::new(1, 1, config_id);
        let result = buffer.report(&update(&member, 0, EdgeStatus::Down, ConfigurationId(999)), &[member.clone()]);
        assert!(result.is_none());
    }

    #[test]
    fn freezes_after_first_proposal() {
        let config_id = ConfigurationId(7);
        let a = Endpoint::new("a", 1);
        let members = vec![a.clone()];
        let mut buffer = WatermarkBuffer::new(1, 1, config_id);
        let first = buffer.report(&update(&a, 0, EdgeStatus::Down, config_id), &members);
        assert!(first.is_some());
        let second = buffer.report(&update(&a, 1, EdgeStatus::Down, config_id), &members);
        assert!(second.is_none());
    }
}
