//! Daemon configuration: CLI flags with environment fallbacks.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use poolwarden_cluster::probe::DEFAULT_COORDINATOR_PORT;
use poolwarden_core::{parse_backend_nodes, parse_duration, BackendNode, ConfigError, RetryPolicy};
use poolwarden_pcp::client::DEFAULT_PCP_PORT;
use poolwarden_pcp::PcpConfig;
use poolwarden_supervisor::ProxyCommand;

use crate::watch_loop::LoopSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "poolwardend",
    about = "Supervises pgpool and keeps its backends in sync with Patroni",
    version
)]
pub struct Cli {
    /// PCP administrative user.
    #[arg(long, env = "PGPOOL_ADMIN_USERNAME", default_value = "admin")]
    pub admin_user: String,

    /// PCP administrative password.
    #[arg(long, env = "PGPOOL_ADMIN_PASSWORD", hide_env_values = true)]
    pub admin_password: Option<String>,

    /// Backend nodes as `index:host:port`, comma separated.
    #[arg(long, env = "PGPOOL_BACKEND_NODES", default_value = "")]
    pub backend_nodes: String,

    /// Directory holding pgpool.conf and pcp.conf.
    #[arg(long, env = "PGPOOL_CONF_DIR", default_value = "/opt/bitnami/pgpool/conf")]
    pub conf_dir: PathBuf,

    /// Directory holding the pgpool and pcp_* binaries.
    #[arg(long, env = "PGPOOL_BIN_DIR", default_value = "/opt/bitnami/pgpool/bin")]
    pub bin_dir: PathBuf,

    /// Host of pgpool's PCP listener.
    #[arg(long, env = "PCP_HOST", default_value = "localhost")]
    pub pcp_host: String,

    /// Port of pgpool's PCP listener.
    #[arg(long, env = "PCP_PORT", default_value_t = DEFAULT_PCP_PORT)]
    pub pcp_port: u16,

    /// PCP password file, written at startup.
    #[arg(long, env = "PCPPASSFILE", default_value = "/tmp/.pcppass")]
    pub pcppass_file: PathBuf,

    /// Timeout for a single PCP command.
    #[arg(long, default_value = "10s", value_parser = duration_arg)]
    pub pcp_timeout: Duration,

    /// Attempts per PCP command before giving up for this cycle.
    #[arg(long, default_value_t = 3)]
    pub pcp_attempts: u32,

    /// Delay between PCP attempts.
    #[arg(long, default_value = "500ms", value_parser = duration_arg)]
    pub pcp_retry_delay: Duration,

    /// Patroni REST API port on every backend.
    #[arg(long, env = "PATRONI_PORT", default_value_t = DEFAULT_COORDINATOR_PORT)]
    pub coordinator_port: u16,

    /// Timeout for a single Patroni query.
    #[arg(long, default_value = "3s", value_parser = duration_arg)]
    pub coordinator_timeout: Duration,

    /// Time between reconciliation cycles.
    #[arg(long, env = "POLL_INTERVAL", default_value = "2s", value_parser = duration_arg)]
    pub poll_interval: Duration,

    /// How long to wait for pgpool's PCP port after launch.
    #[arg(long, default_value = "60s", value_parser = duration_arg)]
    pub ready_timeout: Duration,

    /// Grace period between SIGTERM and SIGKILL on shutdown.
    #[arg(long, default_value = "10s", value_parser = duration_arg)]
    pub shutdown_grace: Duration,

    /// Log a status line every N cycles (0 disables).
    #[arg(long, default_value_t = 30)]
    pub status_every: u64,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

fn duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s).ok_or_else(|| format!("invalid duration '{s}' (expected e.g. 500ms, 3s, 1m)"))
}

/// A credential that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Validated daemon configuration.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub nodes: Vec<BackendNode>,
    pub admin_user: String,
    pub admin_password: Secret,
    pub conf_dir: PathBuf,
    pub bin_dir: PathBuf,
    pub pcp_host: String,
    pub pcp_port: u16,
    pub pcppass_file: PathBuf,
    pub pcp_timeout: Duration,
    pub pcp_retry: RetryPolicy,
    pub coordinator_port: u16,
    pub coordinator_timeout: Duration,
    pub loop_settings: LoopSettings,
}

impl WatcherConfig {
    /// Validate the parsed flags. Fails on a missing password or an empty /
    /// malformed node list.
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let admin_password = cli
            .admin_password
            .filter(|p| !p.is_empty())
            .ok_or(ConfigError::MissingCredential("PGPOOL_ADMIN_PASSWORD"))?;
        if cli.admin_user.trim().is_empty() {
            return Err(ConfigError::MissingCredential("PGPOOL_ADMIN_USERNAME"));
        }
        let nodes = parse_backend_nodes(&cli.backend_nodes)?;

        Ok(Self {
            nodes,
            admin_user: cli.admin_user,
            admin_password: Secret(admin_password),
            conf_dir: cli.conf_dir,
            bin_dir: cli.bin_dir,
            pcp_host: cli.pcp_host,
            pcp_port: cli.pcp_port,
            pcppass_file: cli.pcppass_file,
            pcp_timeout: cli.pcp_timeout,
            pcp_retry: RetryPolicy::new(cli.pcp_attempts, cli.pcp_retry_delay),
            coordinator_port: cli.coordinator_port,
            coordinator_timeout: cli.coordinator_timeout,
            loop_settings: LoopSettings {
                poll_interval: cli.poll_interval,
                ready_timeout: cli.ready_timeout,
                shutdown_grace: cli.shutdown_grace,
                status_every: cli.status_every,
            },
        })
    }

    pub fn pcp_config(&self) -> PcpConfig {
        PcpConfig {
            bin_dir: Some(self.bin_dir.clone()),
            host: self.pcp_host.clone(),
            port: self.pcp_port,
            user: self.admin_user.clone(),
            passfile: self.pcppass_file.clone(),
            timeout: self.pcp_timeout,
            retry: self.pcp_retry,
        }
    }

    pub fn proxy_command(&self) -> ProxyCommand {
        ProxyCommand::pgpool(&self.bin_dir, &self.conf_dir)
    }
}
