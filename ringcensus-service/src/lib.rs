//! The node-level orchestration layer: everything that turns the pure
//! protocol types in `ringcensus-core` and `ringcensus-consensus` into a
//! running member of a cluster.
//!
//! - [`cluster`]: `Cluster`, the public API an embedding application drives
//!   (Section 6).
//! - [`service`]: `MembershipService`, the single-threaded protocol loop
//!   (Section 4.7, Section 5).
//! - [`join`]: the joiner-side two-phase handshake (Section 4.6).
//! - [`watermark`]: failure/join report aggregation (Section 4.2).
//! - [`failure_detector`]: the pluggable link-level failure detector
//!   interface and its default PingPong implementation (Section 4.3).
//! - [`events`]: subscription dispatch (Section 6, Section 9).

pub mod cluster;
pub mod events;
pub mod failure_detector;
pub mod join;
pub mod service;
pub mod watermark;

pub use cluster::{Cluster, ClusterOptions, ClusterOptionsBuilder};
pub use events::{Callback, Event, EventPayload};
pub use failure_detector::{default_factory, LinkFailureDetector, LinkFailureDetectorFactory, PingPongFailureDetector};
pub use join::{join_cluster, JoinOutcome};
pub use service::MembershipService;
pub use watermark::WatermarkBuffer;
