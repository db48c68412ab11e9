//! An in-process `Transport` that routes by endpoint to sibling
//! `MembershipService` instances in the same test binary, via `tokio::spawn`
//! and direct async calls rather than real sockets (Section 10.5).
//!
//! FIFO-per-sender delivery falls out for free: each `send`/`broadcast` call
//! awaits the destination handler directly, so two calls issued in order
//! from the same caller complete against the handler in that order.

use crate::transport::{unavailable, RpcHandler, Transport};
use crate::wire::RpcMessage;
use async_trait::async_trait;
use ringcensus_core::{Endpoint, MembershipError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
pub struct LocalTransport {
    handlers: RwLock<HashMap<Endpoint, Arc<dyn RpcHandler>>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes a peer's handler, simulating a crashed or partitioned node:
    /// subsequent `send`/`broadcast` calls to it fail as `Transient`.
    pub async fn unregister(&self, endpoint: &Endpoint) {
        self.handlers.write().await.remove(endpoint);
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(&self, to: &Endpoint, message: RpcMessage) -> Result<RpcMessage> {
        let handler = {
            let handlers = self.handlers.read().await;
            handlers.get(to).cloned()
        };
        let Some(handler) = handler else {
            return Err(unavailable(to));
        };
        debug!(%to, "local transport: delivering request");
        handler
            .handle(to.clone(), message)
            .await
            .ok_or_else(|| MembershipError::protocol(format!("{to} did not answer a request message")))
    }

    async fn broadcast(&self, to: &[Endpoint], message: RpcMessage) {
        let handlers: Vec<(Endpoint, Arc<dyn RpcHandler>)> = {
            let guard = self.handlers.read().await;
            to.iter().filter_map(|e| guard.get(e).cloned().map(|h| (e.clone(), h))).collect()
        };
        for (endpoint, handler) in handlers {
            let message = message.clone();
            tokio::spawn(async move {
                let _ = handler.handle(endpoint, message).await;
            });
        }
    }

    async fn register(&self, local: Endpoint, handler: Arc<dyn RpcHandler>) {
        self.handlers.write().await.insert(local, handler);
    }
}
