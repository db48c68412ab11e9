//! Client/server interceptor hooks (Section 6's `serverInterceptors` /
//! `clientInterceptors` builder options): side-effecting observers invoked
//! around every outbound send and every inbound dispatch. Real interceptor
//! chains (retry, auth, tracing spans) are a transport concern left to the
//! embedding application (Section 1); this crate only gives it somewhere to
//! plug in.

use crate::transport::{RpcHandler, Transport};
use crate::wire::RpcMessage;
use async_trait::async_trait;
use ringcensus_core::{Endpoint, Result};
use std::sync::Arc;

pub type ClientInterceptor = Arc<dyn Fn(&Endpoint, &RpcMessage) + Send + Sync>;
pub type ServerInterceptor = Arc<dyn Fn(&Endpoint, &RpcMessage) + Send + Sync>;

/// Wraps a `Transport`, invoking every client interceptor before each
/// outbound message leaves the node.
pub struct InterceptingTransport {
    inner: Arc<dyn Transport>,
    interceptors: Vec<ClientInterceptor>,
}

impl InterceptingTransport {
    pub fn new(inner: Arc<dyn Transport>, interceptors: Vec<ClientInterceptor>) -> Self {
        Self { inner, interceptors }
    }
}

#[async_trait]
impl Transport for InterceptingTransport {
    async fn send(&self, to: &Endpoint, message: RpcMessage) -> Result<RpcMessage> {
        for interceptor in &self.interceptors {
            interceptor(to, &message);
        }
        self.inner.send(to, message).await
    }

    async fn broadcast(&self, to: &[Endpoint], message: RpcMessage) {
        for destination in to {
            for interceptor in &self.interceptors {
                interceptor(destination, &message);
            }
        }
        self.inner.broadcast(to, message).await
    }

    async fn register(&self, local: Endpoint, handler: Arc<dyn RpcHandler>) {
        self.inner.register(local, handler).await
    }
}

/// Wraps an `RpcHandler`, invoking every server interceptor before each
/// inbound message is dispatched to it.
pub struct InterceptingHandler {
    inner: Arc<dyn RpcHandler>,
    interceptors: Vec<ServerInterceptor>,
}

impl InterceptingHandler {
    pub fn new(inner: Arc<dyn RpcHandler>, interceptors: Vec<ServerInterceptor>) -> Self {
        Self { inner, interceptors }
    }
}

#[async_trait]
impl RpcHandler for InterceptingHandler {
    async fn handle(&self, from: Endpoint, message: RpcMessage) -> Option<RpcMessage> {
        for interceptor in &self.interceptors {
            interceptor(&from, &message);
        }
        self.inner.handle(from, message).await
    }
}
