//! PCP client over pgpool's command-line tools.
//!
//! Each call spawns the tool with `-h host -p port -U user -w -n <index>`
//! and `PCPPASSFILE` in its environment. A call is bounded by the process
//! timeout; the child is killed if it overruns.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use poolwarden_core::{NodeIndex, ProxyNodeState, RetryPolicy};

use crate::admin::ProxyAdmin;
use crate::node_info::parse_node_info;

/// Default PCP port.
pub const DEFAULT_PCP_PORT: u16 = 9898;

/// The PCP tools we drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcpTool {
    NodeInfo,
    AttachNode,
    DetachNode,
}

impl PcpTool {
    pub fn binary(&self) -> &'static str {
        match self {
            Self::NodeInfo => "pcp_node_info",
            Self::AttachNode => "pcp_attach_node",
            Self::DetachNode => "pcp_detach_node",
        }
    }
}

impl fmt::Display for PcpTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary())
    }
}

/// Errors from a single PCP invocation (or the last of several retries).
#[derive(Debug, Error)]
pub enum PcpError {
    #[error("failed to launch {tool}: {source}")]
    Spawn {
        tool: PcpTool,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} timed out after {after:?}")]
    Timeout { tool: PcpTool, after: Duration },

    #[error("{tool} exited with status {code:?}: {stderr}")]
    Failed {
        tool: PcpTool,
        code: Option<i32>,
        stderr: String,
    },
}

/// Connection and retry settings for the PCP tools.
#[derive(Debug, Clone)]
pub struct PcpConfig {
    /// Directory holding the pcp_* binaries. Falls back to `$PATH`.
    pub bin_dir: Option<PathBuf>,
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Credentials file exported as `PCPPASSFILE`.
    pub passfile: PathBuf,
    /// Per-invocation process timeout.
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl PcpConfig {
    pub fn new(user: impl Into<String>, passfile: impl Into<PathBuf>) -> Self {
        Self {
            bin_dir: None,
            host: "localhost".to_string(),
            port: DEFAULT_PCP_PORT,
            user: user.into(),
            passfile: passfile.into(),
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

/// [`ProxyAdmin`] backed by pgpool's PCP tools.
#[derive(Debug, Clone)]
pub struct PcpClient {
    config: PcpConfig,
}

impl PcpClient {
    pub fn new(config: PcpConfig) -> Self {
        Self { config }
    }

    /// Run a tool against a backend, retrying per the configured policy.
    ///
    /// Returns trimmed stdout of the first successful attempt.
    pub async fn run(&self, tool: PcpTool, index: NodeIndex) -> Result<String, PcpError> {
        self.config
            .retry
            .run(|_| self.run_once(tool, index))
            .await
    }

    /// A single invocation, no retries.
    pub async fn run_once(&self, tool: PcpTool, index: NodeIndex) -> Result<String, PcpError> {
        let mut cmd = Command::new(self.program(tool));
        cmd.args(self.args(index))
            .env("PCPPASSFILE", &self.config.passfile)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.config.timeout, cmd.output()).await {
            Ok(result) => result.map_err(|source| PcpError::Spawn { tool, source })?,
            Err(_) => {
                debug!(%tool, index, timeout = ?self.config.timeout, "PCP command timed out");
                return Err(PcpError::Timeout {
                    tool,
                    after: self.config.timeout,
                });
            }
        };

        if !output.status.success() {
            return Err(PcpError::Failed {
                tool,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Resolve a tool inside `bin_dir` when present there, else by name.
    fn program(&self, tool: PcpTool) -> PathBuf {
        if let Some(dir) = &self.config.bin_dir {
            let candidate = dir.join(tool.binary());
            if candidate.is_file() {
                return candidate;
            }
        }
        PathBuf::from(tool.binary())
    }

    fn args(&self, index: NodeIndex) -> Vec<String> {
        vec![
            "-h".to_string(),
            self.config.host.clone(),
            "-p".to_string(),
            self.config.port.to_string(),
            "-U".to_string(),
            self.config.user.clone(),
            "-w".to_string(),
            "-n".to_string(),
            index.to_string(),
        ]
    }
}

impl ProxyAdmin for PcpClient {
    async fn node_state(&self, index: NodeIndex) -> ProxyNodeState {
        match self.run(PcpTool::NodeInfo, index).await {
            Ok(output) => parse_node_info(&output).unwrap_or_else(|| {
                debug!(index, %output, "malformed pcp_node_info output");
                ProxyNodeState::unknown()
            }),
            Err(e) => {
                debug!(index, error = %e, "node info unavailable");
                ProxyNodeState::unknown()
            }
        }
    }

    async fn attach(&self, index: NodeIndex) -> Result<(), PcpError> {
        self.run(PcpTool::AttachNode, index).await.map(|_| ())
    }

    async fn detach(&self, index: NodeIndex) -> Result<(), PcpError> {
        self.run(PcpTool::DetachNode, index).await.map(|_| ())
    }
}
