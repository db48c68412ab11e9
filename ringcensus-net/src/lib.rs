//! Wire messages and the transport seam the protocol core is driven
//! through.
//!
//! - [`wire`]: the RPC message shapes of Section 6 (`JoinMessage`,
//!   `JoinResponse`, `BatchedLinkUpdateMessage`, the consensus envelope,
//!   and liveness probes), wrapped in one [`wire::RpcMessage`] envelope.
//! - [`transport`]: the [`transport::Transport`] / [`transport::RpcHandler`]
//!   traits a concrete RPC stack implements; the protocol core depends only
//!   on these, never on a specific networking library.
//! - [`local`]: [`local::LocalTransport`], an in-process transport used by
//!   the integration test suite to wire several `MembershipService`
//!   instances together without binding real sockets.
//! - [`broadcast`]: [`broadcast::BroadcastLayer`], the thin fan-out helper
//!   the protocol loop calls to publish link updates and consensus
//!   messages to the current configuration's members.

pub mod broadcast;
pub mod interceptor;
pub mod local;
pub mod transport;
pub mod wire;

pub use broadcast::BroadcastLayer;
pub use interceptor::{ClientInterceptor, InterceptingHandler, InterceptingTransport, ServerInterceptor};
pub use local::LocalTransport;
pub use transport::{RpcHandler, Transport};
pub use wire::{
    BatchedLinkUpdateMessage, JoinMessage, JoinResponse, ProbeMessage, ProbeResponse, ProbeStatus,
    RpcMessage, StatusCode,
};
