//! poolwarden-core — shared types for the pgpool/Patroni reconciler.
//!
//! Holds the data model every other crate speaks in:
//!
//! - [`BackendNode`]: a static backend from the node list
//! - [`ObservedRole`]: what the coordinator says about a node this cycle
//! - [`ProxyNodeState`]: what the proxy says about a node right now
//! - [`ClusterSnapshot`]: one [`ObservedRole`] per configured node
//! - [`ConvergenceAction`]: an attach or detach the reconciler decided on
//!
//! Plus the small pieces of policy shared across crates: the bounded
//! [`RetryPolicy`], [`FailureStreaks`] for persistence-proportional logging,
//! and the node-list / duration parsers used by the configuration surface.

pub mod config;
pub mod error;
pub mod retry;
pub mod streak;
pub mod types;

pub use config::{parse_backend_nodes, parse_duration};
pub use error::ConfigError;
pub use retry::RetryPolicy;
pub use streak::FailureStreaks;
pub use types::*;
