//! Core data types for the membership protocol.
//!
//! This crate holds the protocol's value types and the one pure derived
//! structure computed from them:
//!
//! - [`types`]: `Endpoint`, `NodeId`, `Configuration`, `EdgeStatus`,
//!   `LinkUpdate`, `Proposal` — the data model of Section 3.
//! - [`view`]: `MembershipView`, the K-ring topology derived from a
//!   `Configuration` (Section 4.1).
//! - [`config`]: `ClusterConfig`, the tunable parameters behind
//!   `Cluster::start` / `Cluster::join`.
//! - [`errors`]: the error taxonomy shared by every crate in this
//!   workspace that can fail in a way a caller observes.
//!
//! Nothing in this crate touches I/O, threads, or async runtimes: it is the
//! leaf dependency every other crate in the workspace builds on.

mod config;
mod errors;
mod types;
mod view;

pub use config::{ClusterConfig, ClusterConfigBuilder};
pub use errors::{MembershipError, Result};
pub use types::{
    derive_member_id, Configuration, ConfigurationId, EdgeStatus, Endpoint, LinkUpdate, NodeId, Proposal,
};
pub use view::MembershipView;
