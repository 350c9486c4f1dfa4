//! poolwarden-pcp — pgpool's administrative control channel.
//!
//! pgpool exposes backend membership through the PCP protocol, driven here
//! via its command-line tools (`pcp_node_info`, `pcp_attach_node`,
//! `pcp_detach_node`). Every invocation carries its own process timeout and
//! goes through the bounded [`RetryPolicy`](poolwarden_core::RetryPolicy).
//!
//! # Components
//!
//! - **`admin`**: the [`ProxyAdmin`] seam the reconciler is written against
//! - **`client`**: [`PcpClient`], the real implementation over subprocesses
//! - **`node_info`**: parser for `pcp_node_info` output
//! - **`passfile`**: writer for the `PCPPASSFILE` credentials file

pub mod admin;
pub mod client;
pub mod node_info;
pub mod passfile;

pub use admin::ProxyAdmin;
pub use client::{PcpClient, PcpConfig, PcpError, PcpTool};
pub use node_info::parse_node_info;
pub use passfile::write_passfile;
