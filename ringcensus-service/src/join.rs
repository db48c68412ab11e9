//! The joiner-side half of the join protocol (Section 4.6): phase 1 against
//! a seed, then phase 2 fanned out to the distinct observers the seed
//! named. The seed/observer-side handling of inbound `JoinMessage`s lives in
//! [`crate::service`], since it is just one more RPC the protocol loop
//! dispatches.

use ringcensus_core::{ClusterConfig, ConfigurationId, Endpoint, MembershipError, NodeId, Result};
use ringcensus_net::{JoinMessage, JoinResponse, RpcMessage, StatusCode, Transport};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub struct JoinOutcome {
    pub config_id: ConfigurationId,
    pub members: Vec<Endpoint>,
    pub identifiers: Vec<NodeId>,
    pub metadata: BTreeMap<String, BTreeMap<String, String>>,
}

/// Drives the full two-phase handshake, regenerating the node id on
/// `UUID_ALREADY_IN_RING`, retrying on `CONFIG_CHANGED`, and giving up after
/// `config.max_retries` whole cycles (Section 4.6: "on each exhausted
/// attempt, the server is torn down and an error surfaced").
pub async fn join_cluster(
    local: Endpoint,
    mut node_id: NodeId,
    seed: Endpoint,
    transport: Arc<dyn Transport>,
    metadata: BTreeMap<String, String>,
    config: &ClusterConfig,
) -> Result<JoinOutcome> {
    for attempt in 0..config.max_retries {
        let phase1 = match send_phase1(&local, node_id, &seed, &transport, &metadata, config).await {
            Ok(response) => response,
            Err(err) => {
                warn!(attempt, %err, "join phase 1 failed, retrying");
                continue;
            }
        };

        match phase1.status_code {
            StatusCode::UuidAlreadyInRing => {
                node_id = NodeId::generate();
                continue;
            }
            StatusCode::ConfigChanged => continue,
            StatusCode::MembershipRejected => {
                return Err(MembershipError::join_rejected("seed rejected the join request"))
            }
            StatusCode::SafeToJoin | StatusCode::HostnameAlreadyInRing => {
                let asked_config_id = if phase1.status_code == StatusCode::HostnameAlreadyInRing {
                    ConfigurationId::NONE
                } else {
                    phase1.config_id
                };
                match run_phase2(&local, node_id, asked_config_id, &phase1.hosts, &transport, &metadata, config).await {
                    Some(outcome) => {
                        info!(config_id = %outcome.config_id, "join completed");
                        return Ok(outcome);
                    }
                    None => continue,
                }
            }
        }
    }
    Err(MembershipError::join_rejected("join retries exhausted"))
}

async fn send_phase1(
    local: &Endpoint,
    node_id: NodeId,
    seed: &Endpoint,
    transport: &Arc<dyn Transport>,
    metadata: &BTreeMap<String, String>,
    config: &ClusterConfig,
) -> Result<JoinResponse> {
    let message = RpcMessage::Join(JoinMessage {
        sender: local.clone(),
        uuid: node_id,
        config_id: None,
        ring_numbers: None,
        metadata: Some(metadata.clone()),
    });
    let response = tokio::time::timeout(config.rpc_timeout, transport.send(seed, message))
        .await
        .map_err(|_| MembershipError::transient("phase 1 join request timed out"))??;
    match response {
        RpcMessage::JoinResponse(r) => Ok(r),
        other => Err(MembershipError::protocol(format!("unexpected phase 1 reply: {other:?}"))),
    }
}

/// Groups the K observer slots by endpoint and fires one phase-2 request per
/// distinct observer; the first response reporting `SAFE_TO_JOIN` with a
/// `configurationId` other than the one asked about wins the race (Section
/// 4.6; the Open Question in Section 9 is preserved deliberately: this does
/// not additionally check that `local` is actually a member of that view).
async fn run_phase2(
    local: &Endpoint,
    node_id: NodeId,
    asked_config_id: ConfigurationId,
    observers: &[Endpoint],
    transport: &Arc<dyn Transport>,
    metadata: &BTreeMap<String, String>,
    config: &ClusterConfig,
) -> Option<JoinOutcome> {
    let mut ring_numbers_by_observer: BTreeMap<Endpoint, Vec<u32>> = BTreeMap::new();
    for (ring_number, observer) in observers.iter().enumerate() {
        ring_numbers_by_observer.entry(observer.clone()).or_default().push(ring_number as u32);
    }
    if ring_numbers_by_observer.is_empty() {
        return None;
    }

    let (tx, mut rx) = mpsc::channel(ring_numbers_by_observer.len().max(1));
    for (observer, ring_numbers) in ring_numbers_by_observer {
        let local = local.clone();
        let transport = transport.clone();
        let tx = tx.clone();
        let timeout = config.join_phase2_timeout;
        let config_id = if asked_config_id == ConfigurationId::NONE { None } else { Some(asked_config_id) };
        let metadata = metadata.clone();
        tokio::spawn(async move {
            let message = RpcMessage::Join(JoinMessage {
                sender: local,
                uuid: node_id,
                config_id,
                ring_numbers: Some(ring_numbers),
                metadata: Some(metadata),
            });
            let outcome = tokio::time::timeout(timeout, transport.send(&observer, message)).await;
            let _ = tx.send(outcome).await;
        });
    }
    drop(tx);

    while let Some(outcome) = rx.recv().await {
        let Ok(Ok(RpcMessage::JoinResponse(response))) = outcome else {
            continue;
        };
        if response.status_code == StatusCode::SafeToJoin && response.config_id != asked_config_id {
            return Some(JoinOutcome {
                config_id: response.config_id,
                members: response.hosts,
                identifiers: response.identifiers,
                metadata: response.cluster_metadata,
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringcensus_net::{LocalTransport, RpcHandler};
    use async_trait::async_trait;

    struct FixedSeed {
        response: JoinResponse,
    }

    #[async_trait]
    impl RpcHandler for FixedSeed {
        async fn handle(&self, _from: Endpoint, _message: RpcMessage) -> Option<RpcMessage> {
            Some(RpcMessage::JoinResponse(self.response.clone()))
        }
    }

    #[tokio::test]
    async fn membership_rejected_surfaces_as_join_rejected() {
        let transport: Arc<dyn Transport> = Arc::new(LocalTransport::new());
        let seed = Endpoint::new("seed", 1);
        let handler = Arc::new(FixedSeed {
            response: JoinResponse {
                sender: seed.clone(),
                status_code: StatusCode::MembershipRejected,
                config_id: ConfigurationId(1),
                hosts: vec![],
                identifiers: vec![],
                cluster_metadata: Default::default(),
            },
        });
        transport.register(seed.clone(), handler).await;

        let config = ClusterConfig::default();
        let result = join_cluster(
            Endpoint::new("joiner", 2),
            NodeId::generate(),
            seed,
            transport,
            Default::default(),
            &config,
        )
        .await;
        assert!(matches!(result, Err(MembershipError::JoinRejected { .. })));
    }

    #[tokio::test]
    async fn unreachable_seed_exhausts_retries_and_is_rejected() {
        let transport: Arc<dyn Transport> = Arc::new(LocalTransport::new());
        let mut config = ClusterConfig::default();
        config.max_retries = 2;
        let result = join_cluster(
            Endpoint::new("joiner", 2),
            NodeId::generate(),
            Endpoint::new("nobody-home", 1),
            transport,
            Default::default(),
            &config,
        )
        .await;
        assert!(result.is_err());
    }
}
