//! The supervised pgpool process.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::{error, info, warn};

use crate::readiness::port_open;

/// Errors raised while launching the proxy.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Lifecycle operations the watch loop needs from its child process.
pub trait Supervisor {
    /// Non-blocking check that the child has not exited.
    fn is_alive(&mut self) -> bool;

    /// Wait until the child's control port accepts connections.
    ///
    /// Returns `false` on timeout or if the child exits while waiting.
    fn wait_until_ready(&mut self, timeout: Duration) -> impl Future<Output = bool> + Send;

    /// SIGTERM, wait up to `grace`, then SIGKILL.
    fn shutdown(&mut self, grace: Duration) -> impl Future<Output = ()> + Send;

    /// SIGKILL immediately and reap.
    fn kill(&mut self) -> impl Future<Output = ()> + Send;
}

/// Program and arguments used to start the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ProxyCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// `pgpool -n -f <conf>/pgpool.conf -F <conf>/pcp.conf`, in the foreground.
    pub fn pgpool(bin_dir: &Path, conf_dir: &Path) -> Self {
        Self::new(
            bin_dir.join("pgpool"),
            vec![
                "-n".to_string(),
                "-f".to_string(),
                conf_dir.join("pgpool.conf").display().to_string(),
                "-F".to_string(),
                conf_dir.join("pcp.conf").display().to_string(),
            ],
        )
    }
}

/// Owns the pgpool child and its readiness endpoint.
#[derive(Debug)]
pub struct ProcessSupervisor {
    child: Child,
    ready_host: String,
    ready_port: u16,
    probe_interval: Duration,
    exit_status: Option<ExitStatus>,
}

impl ProcessSupervisor {
    /// Launch the proxy. Its stdout/stderr are inherited.
    ///
    /// The child is killed if the supervisor is dropped while it runs.
    pub fn spawn(
        command: &ProxyCommand,
        ready_host: impl Into<String>,
        ready_port: u16,
    ) -> Result<Self, SupervisorError> {
        info!(program = %command.program.display(), "starting proxy");

        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                program: command.program.display().to_string(),
                source,
            })?;

        info!(pid = child.id(), "proxy started");

        Ok(Self {
            child,
            ready_host: ready_host.into(),
            ready_port,
            probe_interval: Duration::from_secs(1),
            exit_status: None,
        })
    }

    /// Override how often readiness is polled.
    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Exit status, once the child has been observed to exit.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    fn record_exit(&mut self, status: ExitStatus) {
        if self.exit_status.is_none() {
            self.exit_status = Some(status);
        }
    }

    fn terminate(&self) {
        let Some(pid) = self.child.id() else {
            return;
        };
        let Ok(raw) = i32::try_from(pid) else {
            return;
        };
        // The child is unreaped, so its pid cannot have been recycled.
        if let Err(e) = signal::kill(Pid::from_raw(raw), Signal::SIGTERM)
            && e != Errno::ESRCH
        {
            warn!(pid, error = %e, "failed to send SIGTERM");
        }
    }
}

impl Supervisor for ProcessSupervisor {
    fn is_alive(&mut self) -> bool {
        if self.exit_status.is_some() {
            return false;
        }
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                error!(%status, "proxy process exited");
                self.record_exit(status);
                false
            }
            Err(e) => {
                error!(error = %e, "lost track of proxy process");
                false
            }
        }
    }

    async fn wait_until_ready(&mut self, timeout: Duration) -> bool {
        info!(host = %self.ready_host, port = self.ready_port, "waiting for PCP port");
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if !self.is_alive() {
                error!("proxy exited before becoming ready");
                return false;
            }
            if port_open(&self.ready_host, self.ready_port).await {
                info!("PCP port ready");
                return true;
            }
            if tokio::time::Instant::now() + self.probe_interval > deadline {
                error!(?timeout, "timeout waiting for PCP port");
                return false;
            }
            tokio::time::sleep(self.probe_interval).await;
        }
    }

    async fn shutdown(&mut self, grace: Duration) {
        if !self.is_alive() {
            return;
        }

        info!(pid = self.child.id(), "stopping proxy");
        self.terminate();

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(%status, "proxy stopped");
                self.record_exit(status);
            }
            Ok(Err(e)) => warn!(error = %e, "failed waiting for proxy to stop"),
            Err(_) => {
                warn!(?grace, "proxy didn't stop gracefully, killing");
                self.kill().await;
            }
        }
    }

    async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!(error = %e, "failed to kill proxy");
            return;
        }
        if let Ok(Some(status)) = self.child.try_wait() {
            self.record_exit(status);
        }
    }
}
