//! poolwarden-cluster — reads the replication topology from the coordinator.
//!
//! Each configured backend runs a Patroni agent exposing its role on a
//! small REST endpoint. The reader asks every node in turn and folds the
//! answers into a [`ClusterSnapshot`](poolwarden_core::ClusterSnapshot).
//!
//! # Architecture
//!
//! ```text
//! ClusterStateReader
//!   ├── for each BackendNode (sequential)
//!   │   ├── RoleProbe::fetch_role() → Option<role string> | ProbeError
//!   │   └── ObservedRole::from_coordinator()
//!   └── FailureStreaks (debug on first misses, warn once sustained)
//! ```
//!
//! An unreachable node is classified `Unknown`; it never aborts the
//! snapshot and never blocks the other nodes beyond its own timeout.

pub mod probe;
pub mod reader;

pub use probe::{HttpRoleProbe, ProbeError, RoleProbe};
pub use reader::ClusterStateReader;
