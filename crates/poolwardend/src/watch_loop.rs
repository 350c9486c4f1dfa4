//! The watch loop: launch, wait for readiness, reconcile until stopped.
//!
//! ```text
//! Starting ──► WaitingReady ──► Running ──► ShuttingDown ──► Stopped
//!    │              │              │                            ▲
//!    └──────────────┴──────────────┴── launch / ready / death ──┘
//! ```
//!
//! A cycle is: liveness check, coordinator snapshot, liveness check,
//! reconcile pass, sleep. Every cycle reconciles all nodes, whether or not
//! the snapshot changed, so drift made behind our back is corrected within
//! one interval.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use poolwarden_cluster::{ClusterStateReader, RoleProbe};
use poolwarden_core::{ClusterSnapshot, Leader, NodeIndex};
use poolwarden_pcp::ProxyAdmin;
use poolwarden_reconcile::Reconciler;
use poolwarden_supervisor::{Supervisor, SupervisorError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Starting,
    WaitingReady,
    Running,
    ShuttingDown,
    Stopped,
}

/// Why the loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Shutdown was requested and the proxy was stopped.
    Clean,
    /// The proxy could not be started.
    LaunchFailed,
    /// The proxy never opened its control port.
    NotReady,
    /// The proxy exited on its own.
    ProxyDied,
}

impl Exit {
    /// Process exit code.
    pub fn code(self) -> u8 {
        match self {
            Self::Clean => 0,
            Self::LaunchFailed | Self::NotReady | Self::ProxyDied => 1,
        }
    }
}

/// Timing knobs for the loop.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub poll_interval: Duration,
    pub ready_timeout: Duration,
    pub shutdown_grace: Duration,
    /// Emit a status line every N cycles; 0 disables it.
    pub status_every: u64,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            ready_timeout: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(10),
            status_every: 30,
        }
    }
}

pub struct WatchLoop<P, A> {
    reader: ClusterStateReader<P>,
    reconciler: Reconciler<A>,
    settings: LoopSettings,
    state: WatchState,
    history: Vec<WatchState>,
    /// Last snapshot and leader, only to log changes once.
    last_snapshot: Option<ClusterSnapshot>,
    last_leader: Option<Leader>,
    cycles: u64,
}

impl<P: RoleProbe, A: ProxyAdmin> WatchLoop<P, A> {
    pub fn new(
        reader: ClusterStateReader<P>,
        reconciler: Reconciler<A>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            reader,
            reconciler,
            settings,
            state: WatchState::Starting,
            history: vec![WatchState::Starting],
            last_snapshot: None,
            last_leader: None,
            cycles: 0,
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    /// Every state entered so far, in order.
    pub fn history(&self) -> &[WatchState] {
        &self.history
    }

    pub fn visited(&self, state: WatchState) -> bool {
        self.history.contains(&state)
    }

    /// Completed reconcile cycles.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    fn transition(&mut self, next: WatchState) {
        debug!(from = ?self.state, to = ?next, "state transition");
        self.state = next;
        self.history.push(next);
    }

    /// Drive the proxy from launch to exit.
    ///
    /// `shutdown` flipping to `true` stops the loop at the next check:
    /// before a cycle, between nodes, or during the sleep.
    pub async fn run<S, F>(&mut self, launch: F, mut shutdown: watch::Receiver<bool>) -> Exit
    where
        S: Supervisor,
        F: FnOnce() -> Result<S, SupervisorError>,
    {
        let mut proxy = match launch() {
            Ok(proxy) => proxy,
            Err(e) => {
                error!(error = %e, "failed to start proxy");
                self.transition(WatchState::Stopped);
                return Exit::LaunchFailed;
            }
        };

        self.transition(WatchState::WaitingReady);
        let ready = tokio::select! {
            ready = proxy.wait_until_ready(self.settings.ready_timeout) => Some(ready),
            _ = shutdown_requested(&mut shutdown) => None,
        };
        match ready {
            None => return self.stop(&mut proxy).await,
            Some(false) => {
                error!(timeout = ?self.settings.ready_timeout, "proxy never became ready, exiting");
                proxy.kill().await;
                self.transition(WatchState::Stopped);
                return Exit::NotReady;
            }
            Some(true) => {}
        }

        self.transition(WatchState::Running);
        info!(
            nodes = self.reader.nodes().len(),
            interval = ?self.settings.poll_interval,
            "watching cluster"
        );

        loop {
            if *shutdown.borrow() {
                return self.stop(&mut proxy).await;
            }
            if !self.cycle(&mut proxy, &shutdown).await {
                error!("proxy process died, exiting");
                self.transition(WatchState::Stopped);
                return Exit::ProxyDied;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                _ = shutdown_requested(&mut shutdown) => {}
            }
        }
    }

    /// One reconcile cycle. Returns `false` if the proxy is gone.
    async fn cycle<S: Supervisor>(
        &mut self,
        proxy: &mut S,
        shutdown: &watch::Receiver<bool>,
    ) -> bool {
        if !proxy.is_alive() {
            return false;
        }

        let snapshot = self.reader.snapshot().await;
        self.observe(&snapshot);

        // The snapshot can take several probe timeouts; don't drive a dead proxy.
        if !proxy.is_alive() {
            return false;
        }

        let report = self.reconciler.reconcile(&snapshot, shutdown).await;
        if report.changed() {
            info!(
                applied = ?report.applied,
                failed = ?report.failed,
                "reconciled proxy membership"
            );
        }

        self.cycles += 1;
        if self.settings.status_every > 0 && self.cycles % self.settings.status_every == 0 {
            info!(
                cycle = self.cycles,
                healthy = snapshot.healthy_count(),
                total = snapshot.len(),
                leader = %self.leader_label(&snapshot.leader()),
                "status"
            );
        }

        self.last_snapshot = Some(snapshot);
        true
    }

    /// Log coordinator-side changes: roles at debug, leadership at info/warn.
    fn observe(&mut self, snapshot: &ClusterSnapshot) {
        if self.last_snapshot.as_ref() != Some(snapshot) {
            let roles: Vec<String> = snapshot
                .iter()
                .map(|(index, role)| format!("{}={role}", self.node_name(index)))
                .collect();
            debug!(?roles, "cluster state changed");
        }

        let leader = snapshot.leader();
        if self.last_leader.as_ref() == Some(&leader) {
            return;
        }
        match &leader {
            Leader::Single(index) => {
                info!(leader = %self.node_name(*index), "leader changed");
            }
            Leader::None => warn!("no leader found in cluster"),
            Leader::Multiple(_) => {
                warn!(
                    primaries = %self.leader_label(&leader),
                    "multiple nodes report primary, no definitive leader"
                );
            }
        }
        self.last_leader = Some(leader);
    }

    async fn stop<S: Supervisor>(&mut self, proxy: &mut S) -> Exit {
        self.transition(WatchState::ShuttingDown);
        info!("shutdown requested, stopping proxy");
        proxy.shutdown(self.settings.shutdown_grace).await;
        self.transition(WatchState::Stopped);
        info!("stopped");
        Exit::Clean
    }

    fn node_name(&self, index: NodeIndex) -> String {
        self.reader
            .nodes()
            .iter()
            .find(|n| n.index == index)
            .map(|n| n.name.clone())
            .unwrap_or_else(|| index.to_string())
    }

    fn leader_label(&self, leader: &Leader) -> String {
        match leader {
            Leader::Single(index) => self.node_name(*index),
            Leader::None => "none".to_string(),
            Leader::Multiple(indexes) => indexes
                .iter()
                .map(|i| self.node_name(*i))
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

/// Resolves once shutdown has been requested. If the sender is gone no
/// request can arrive, so this never resolves.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
