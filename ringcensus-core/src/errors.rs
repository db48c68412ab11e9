//! Error taxonomy for the membership protocol core.
//!
//! Every crate boundary a caller can observe (`Cluster::start`, `Cluster::join`,
//! and anything fed back through a subscriber) returns one of these variants
//! rather than a raw `anyhow::Error`. Internal orchestration code is free to
//! use `anyhow::Result` with `.context(..)` the way the rest of this codebase
//! does; it converts into `MembershipError` only at the boundary.

use thiserror::Error;

/// Errors surfaced across the membership service's public boundary.
///
/// The four variants mirror the error kinds named for the protocol: transient
/// failures that were already retried to exhaustion, malformed or unexpected
/// protocol traffic, a rejected join attempt, and a node-fatal shutdown.
#[derive(Debug, Error, Clone)]
pub enum MembershipError {
    /// An RPC-level failure that was retried up to the configured bound and
    /// still did not succeed (timeout, channel unavailable, unknown
    /// configuration id that never resolved).
    #[error("transient failure after retries: {reason}")]
    Transient { reason: String },

    /// A protocol invariant was violated by an incoming message (unknown
    /// status code, malformed payload, decoding failure). The offending
    /// message is dropped and the protocol loop continues; this variant is
    /// for callers that need to observe the event (e.g. tests).
    #[error("protocol violation: {reason}")]
    Protocol { reason: String },

    /// A join attempt failed for a reason the caller cannot retry past:
    /// explicit policy rejection, or bounded retries exhausted.
    #[error("join rejected: {reason}")]
    JoinRejected { reason: String },

    /// The node is shutting down; no further operations will complete.
    #[error("shutdown requested")]
    ShutdownRequested,
}

impl MembershipError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient { reason: reason.into() }
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol { reason: reason.into() }
    }

    pub fn join_rejected(reason: impl Into<String>) -> Self {
        Self::JoinRejected { reason: reason.into() }
    }
}

pub type Result<T> = std::result::Result<T, MembershipError>;
