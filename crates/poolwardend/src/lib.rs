//! poolwardend — the poolwarden daemon.
//!
//! Runs as the main process of a pgpool container:
//! - Starts pgpool as a child process and waits for its PCP port
//! - Polls Patroni on every backend at a fixed interval
//! - Attaches/detaches pgpool backends to match Patroni's view
//! - Exits non-zero the moment pgpool dies, so the orchestrator restarts
//!   the whole unit
//!
//! # Usage
//!
//! ```text
//! PGPOOL_ADMIN_PASSWORD=... \
//! PGPOOL_BACKEND_NODES=0:pg-0.internal:5432,1:pg-1.internal:5432 \
//!   poolwardend --poll-interval 2s
//! ```

pub mod config;
pub mod watch_loop;

pub use config::{Cli, LogFormat, WatcherConfig};
pub use watch_loop::{Exit, LoopSettings, WatchLoop, WatchState};
