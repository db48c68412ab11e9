//! `LinkFailureDetector` (Section 4.3): the pluggable interface between
//! per-edge liveness checks and the watermark buffer, plus the default
//! "PingPong" implementation.

use async_trait::async_trait;
use ringcensus_core::Endpoint;
use ringcensus_net::{ProbeMessage, ProbeResponse, ProbeStatus, RpcMessage, Transport};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Implementers must tolerate concurrent calls to `check`/`handle_probe`
/// from the probe worker racing with a serial call to
/// `on_membership_change` from the protocol loop (Section 9).
#[async_trait]
pub trait LinkFailureDetector: Send + Sync {
    /// Performs one probe of `observed`; implementations may batch several
    /// observed endpoints into one underlying round.
    async fn check(&self, observed: &Endpoint);

    /// Pure query of the current verdict: `true` once a transition to DOWN
    /// has been debounced and surfaced.
    fn has_failed(&self, observed: &Endpoint) -> bool;

    /// The receiver side of a probe, so that two detectors using the same
    /// implementation are symmetric peers of each other.
    async fn handle_probe(&self, incoming: ProbeMessage) -> ProbeResponse;

    /// Called on every view change with the new set of endpoints this node
    /// is responsible for observing.
    fn on_membership_change(&self, new_observed: Vec<Endpoint>);
}

/// Builds a `LinkFailureDetector` bound to a specific local endpoint and
/// transport. `Cluster`'s builder accepts one of these in place of the
/// default PingPong detector (Section 6, `linkFailureDetectorFactory`).
pub type LinkFailureDetectorFactory =
    Arc<dyn Fn(Endpoint, Arc<dyn Transport>, u32, Duration) -> Arc<dyn LinkFailureDetector> + Send + Sync>;

pub fn default_factory() -> LinkFailureDetectorFactory {
    Arc::new(|local, transport, failure_threshold, probe_timeout| {
        Arc::new(PingPongFailureDetector::new(local, transport, failure_threshold, probe_timeout))
    })
}

/// Probes each observed peer and flips DOWN only after `failure_threshold`
/// consecutive failed probes, debouncing a single dropped packet from ever
/// reaching the watermark buffer as a verdict change.
pub struct PingPongFailureDetector {
    local: Endpoint,
    transport: Arc<dyn Transport>,
    failure_threshold: u32,
    probe_timeout: Duration,
    consecutive_failures: parking_lot::Mutex<HashMap<Endpoint, u32>>,
    failed: parking_lot::Mutex<std::collections::HashSet<Endpoint>>,
}

impl PingPongFailureDetector {
    pub fn new(local: Endpoint, transport: Arc<dyn Transport>, failure_threshold: u32, probe_timeout: Duration) -> Self {
        Self {
            local,
            transport,
            failure_threshold,
            probe_timeout,
            consecutive_failures: parking_lot::Mutex::new(HashMap::new()),
            failed: parking_lot::Mutex::new(std::collections::HashSet::new()),
        }
    }
}

#[async_trait]
impl LinkFailureDetector for PingPongFailureDetector {
    async fn check(&self, observed: &Endpoint) {
        let message = RpcMessage::Probe(ProbeMessage { sender: self.local.clone() });
        let outcome = tokio::time::timeout(self.probe_timeout, self.transport.send(observed, message)).await;

        let mut counts = self.consecutive_failures.lock();
        match outcome {
            Ok(Ok(RpcMessage::ProbeResponse(ProbeResponse { status: ProbeStatus::Ok }))) => {
                counts.insert(observed.clone(), 0);
                self.failed.lock().remove(observed);
            }
            _ => {
                let count = counts.entry(observed.clone()).or_insert(0);
                *count += 1;
                if *count >= self.failure_threshold {
                    debug!(%observed, consecutive_failures = *count, "link failure detector: verdict flipped to DOWN");
                    self.failed.lock().insert(observed.clone());
                }
            }
        }
    }

    fn has_failed(&self, observed: &Endpoint) -> bool {
        self.failed.lock().contains(observed)
    }

    async fn handle_probe(&self, _incoming: ProbeMessage) -> ProbeResponse {
        ProbeResponse { status: ProbeStatus::Ok }
    }

    fn on_membership_change(&self, new_observed: Vec<Endpoint>) {
        let retained: std::collections::HashSet<Endpoint> = new_observed.into_iter().collect();
        self.consecutive_failures.lock().retain(|e, _| retained.contains(e));
        self.failed.lock().retain(|e| retained.contains(e));
    }
}
