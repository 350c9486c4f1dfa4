//! poolwarden-supervisor — owns the pgpool child process.
//!
//! The watcher has no purpose without a live proxy, so the child is a
//! single owned resource with narrow accessors: launch it, wait until its
//! PCP port accepts connections, poll whether it is still running, and stop
//! it (SIGTERM, grace period, then SIGKILL).

pub mod process;
pub mod readiness;

pub use process::{ProcessSupervisor, ProxyCommand, Supervisor, SupervisorError};
pub use readiness::port_open;
