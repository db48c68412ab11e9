//! `ClusterConfig`: the builder-backed configuration object for
//! `Cluster::start` / `Cluster::join` (Section 6's "recognized builder
//! options"). There is no external file/env loader here — the embedding
//! application constructs this in-process, matching the options-object shape
//! the spec describes.

use crate::errors::{MembershipError, Result};
use std::time::Duration;

/// Tunable parameters for one `Cluster` instance.
///
/// Defaults match the values named throughout the component design:
/// K=10 rings, H=9/L=4 watermarks, 1s probe interval, 1s generic RPC
/// deadline, 5s join phase-2 deadline, 5 bounded retries.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Number of independent rings (K).
    pub ring_count: u32,
    /// High watermark (H): reports required before an endpoint enters the
    /// pending proposal set.
    pub high_watermark: u32,
    /// Low watermark (L): reports required before an endpoint is considered
    /// "unstable" and starts counting toward eligibility.
    pub low_watermark: u32,
    /// Interval between failure-detector probes.
    pub probe_interval: Duration,
    /// Consecutive probe failures required before a verdict flips to DOWN.
    pub failure_threshold: u32,
    /// Deadline for a generic unary RPC (link-update broadcast acks, probes).
    pub rpc_timeout: Duration,
    /// Deadline for a single probe.
    pub probe_timeout: Duration,
    /// Deadline for a join phase-2 round trip.
    pub join_phase2_timeout: Duration,
    /// Bound on retry attempts for any retried operation (join, RPC).
    pub max_retries: u32,
    /// Fast-path decision window: how long a node waits for a fast-path
    /// quorum before falling back to classical Paxos.
    pub fast_path_window: Duration,
    /// Base timeout for the classic-Paxos proposer backoff
    /// (`[0, base * 2^round)`).
    pub paxos_base_timeout: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            ring_count: 10,
            high_watermark: 9,
            low_watermark: 4,
            probe_interval: Duration::from_secs(1),
            failure_threshold: 3,
            rpc_timeout: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(1),
            join_phase2_timeout: Duration::from_secs(5),
            max_retries: 5,
            fast_path_window: Duration::from_millis(500),
            paxos_base_timeout: Duration::from_millis(500),
        }
    }
}

impl ClusterConfig {
    pub fn builder() -> ClusterConfigBuilder {
        ClusterConfigBuilder::default()
    }

    /// Enforces `L < H <= K` and a non-zero ring count (Section 4.2). Called
    /// at `Cluster::start` / `Cluster::join` time rather than on every
    /// field mutation, so a builder can be assembled in any field order.
    pub fn validate(&self) -> Result<()> {
        if self.ring_count == 0 {
            return Err(MembershipError::protocol("ring_count must be > 0"));
        }
        if self.high_watermark > self.ring_count {
            return Err(MembershipError::protocol("high_watermark must be <= ring_count"));
        }
        if self.low_watermark >= self.high_watermark {
            return Err(MembershipError::protocol("low_watermark must be < high_watermark"));
        }
        Ok(())
    }
}

/// Fluent builder for the protocol-tuning fields of Section 6's options
/// object. The per-node concerns named alongside them there — metadata, the
/// detector factory, interceptors — are transport/wiring concerns owned by
/// `ringcensus-service::ClusterOptions` instead.
#[derive(Debug, Clone, Default)]
pub struct ClusterConfigBuilder {
    config: ClusterConfig,
}

impl ClusterConfigBuilder {
    pub fn ring_count(mut self, k: u32) -> Self {
        self.config.ring_count = k;
        self
    }

    pub fn watermarks(mut self, low: u32, high: u32) -> Self {
        self.config.low_watermark = low;
        self.config.high_watermark = high;
        self
    }

    pub fn probe_interval(mut self, d: Duration) -> Self {
        self.config.probe_interval = d;
        self
    }

    pub fn failure_threshold(mut self, n: u32) -> Self {
        self.config.failure_threshold = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn fast_path_window(mut self, d: Duration) -> Self {
        self.config.fast_path_window = d;
        self
    }

    pub fn paxos_base_timeout(mut self, d: Duration) -> Self {
        self.config.paxos_base_timeout = d;
        self
    }

    pub fn build(self) -> Result<ClusterConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
