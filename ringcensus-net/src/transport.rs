//! The transport seam (Section 10.5): the protocol core only ever depends
//! on this trait, never on a concrete RPC stack. Production wiring plugs in
//! whatever the embedding application prefers; tests plug in
//! [`crate::local::LocalTransport`].

use crate::wire::RpcMessage;
use async_trait::async_trait;
use ringcensus_core::{Endpoint, MembershipError, Result};

/// The receiving half: whatever owns a `Transport` registers one of these
/// per local endpoint so inbound messages reach the protocol loop.
///
/// `handle` never blocks for long and never panics on a malformed message —
/// Section 7 requires protocol-kind errors to be logged and the message
/// dropped rather than propagated.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    /// Handles one inbound message from `from`. Returns a response for
    /// request/response exchanges (join, probe); `None` for fire-and-forget
    /// broadcasts (link-update batches, consensus messages).
    async fn handle(&self, from: Endpoint, message: RpcMessage) -> Option<RpcMessage>;
}

/// Best-effort point-to-point and broadcast delivery (Section 4.4).
///
/// Implementations must preserve FIFO order for messages from the same
/// sender to the same destination (Section 5); they need not preserve any
/// order across distinct senders.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Request/response exchange used by the join handshake and probes.
    /// Returns a `Transient` error on timeout or an unreachable peer.
    async fn send(&self, to: &Endpoint, message: RpcMessage) -> Result<RpcMessage>;

    /// Fire-and-forget delivery to every destination; failures to
    /// individual peers are swallowed (Section 4.4: "higher layers treat
    /// message loss as the common case").
    async fn broadcast(&self, to: &[Endpoint], message: RpcMessage);

    /// Registers the local handler that inbound messages addressed to
    /// `local` should be dispatched to. Implementations that route by
    /// endpoint (e.g. `LocalTransport`) use this to build their routing
    /// table; a real network transport would use it to bind a listener.
    async fn register(&self, local: Endpoint, handler: std::sync::Arc<dyn RpcHandler>);
}

pub(crate) fn unavailable(endpoint: &Endpoint) -> MembershipError {
    MembershipError::transient(format!("no route to {endpoint}"))
}
