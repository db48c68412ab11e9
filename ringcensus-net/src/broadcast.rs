//! `BroadcastLayer`: a thin, best-effort fan-out helper over a [`Transport`]
//! (Section 4.4). It exists so the protocol loop deals in the unwrapped
//! domain types (`LinkUpdate`, `ConsensusMessage`) and never has to build
//! `RpcMessage` envelopes itself.

use crate::transport::Transport;
use crate::wire::{BatchedLinkUpdateMessage, RpcMessage};
use ringcensus_consensus::ConsensusMessage;
use ringcensus_core::{ConfigurationId, Endpoint, LinkUpdate};
use std::sync::Arc;

pub struct BroadcastLayer {
    local: Endpoint,
    transport: Arc<dyn Transport>,
}

impl BroadcastLayer {
    pub fn new(local: Endpoint, transport: Arc<dyn Transport>) -> Self {
        Self { local, transport }
    }

    /// Fans a batch of link-update verdicts out to `members`. Per Section
    /// 4.4, this fires and forgets: delivery failures are the common case
    /// and are handled entirely by the watermark buffer's tolerance for
    /// missing reports, not by retrying here.
    pub async fn broadcast_link_updates(
        &self,
        members: &[Endpoint],
        config_id: ConfigurationId,
        updates: Vec<LinkUpdate>,
    ) {
        let message = RpcMessage::LinkUpdateBatch(BatchedLinkUpdateMessage {
            sender: self.local.clone(),
            config_id,
            updates,
        });
        self.transport.broadcast(members, message).await;
    }

    pub async fn broadcast_consensus(&self, members: &[Endpoint], message: ConsensusMessage) {
        self.transport.broadcast(members, RpcMessage::Consensus(message)).await;
    }
}
