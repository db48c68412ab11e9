//! Agreement on the next `Configuration`.
//!
//! Two algorithms feed the same decision sink:
//!
//! - [`fastpaxos`]: one-round agreement when a fast-path quorum of members
//!   independently broadcast the identical proposal.
//! - [`classicpaxos`]: the Prepare/Promise/Propose/Accept fallback run when
//!   the fast path's window elapses without a quorum.
//! - [`engine`]: [`ConsensusEngine`], which owns both state machines for one
//!   active configuration id and starts the fallback on demand.
//! - [`types`]: the wire messages (`ConsensusMessage`) and ballot ordering
//!   shared by both algorithms.
//!
//! This crate has no notion of membership, rings, or the network: it is
//! driven purely by `(sender, message, member_count)` tuples handed to it by
//! `ringcensus-service`'s orchestrator, and emits messages for that
//! orchestrator to broadcast.

pub mod classicpaxos;
pub mod engine;
pub mod fastpaxos;
pub mod types;

pub use classicpaxos::{ClassicPaxosState, StepResult};
pub use engine::{ConsensusEngine, EngineStep};
pub use fastpaxos::FastPaxosState;
pub use types::{fast_path_quorum_size, majority_quorum_size, Ballot, ConsensusMessage};
