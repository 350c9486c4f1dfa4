//! Compares coordinator roles against proxy membership and converges them.

use std::collections::BTreeMap;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use poolwarden_core::{
    BackendNode, ClusterSnapshot, ConvergenceAction, FailureStreaks, MembershipStatus, NodeIndex,
    ObservedRole, ProxyNodeState,
};
use poolwarden_pcp::ProxyAdmin;

/// Decide the action for one node.
pub fn decide(
    index: NodeIndex,
    role: ObservedRole,
    membership: MembershipStatus,
) -> Option<ConvergenceAction> {
    match (role.is_healthy(), membership == MembershipStatus::Up) {
        (true, false) => Some(ConvergenceAction::Attach(index)),
        (false, true) => Some(ConvergenceAction::Detach(index)),
        _ => None,
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Actions the proxy accepted.
    pub applied: Vec<ConvergenceAction>,
    /// Actions that still failed after retries; retried next cycle.
    pub failed: Vec<ConvergenceAction>,
    /// Proxy state observed for each evaluated node.
    pub observed: BTreeMap<NodeIndex, ProxyNodeState>,
    /// The pass stopped early because shutdown was requested.
    pub interrupted: bool,
}

impl ReconcileReport {
    /// Whether any action was taken this pass.
    pub fn changed(&self) -> bool {
        !self.applied.is_empty()
    }
}

/// Applies [`decide`] to every configured node through a [`ProxyAdmin`].
pub struct Reconciler<A> {
    nodes: Vec<BackendNode>,
    admin: A,
    /// Consecutive failed actions per node, for log severity only.
    failures: FailureStreaks,
    /// Consecutive passes where the proxy state of a node could not be read.
    unreadable: FailureStreaks,
}

impl<A: ProxyAdmin> Reconciler<A> {
    pub fn new(nodes: Vec<BackendNode>, admin: A) -> Self {
        Self {
            nodes,
            admin,
            failures: FailureStreaks::default(),
            unreadable: FailureStreaks::default(),
        }
    }

    pub fn admin(&self) -> &A {
        &self.admin
    }

    /// Run one pass over all nodes.
    ///
    /// Proxy state is fetched per node right before deciding. A failing node
    /// is logged and skipped; it never stops the pass. `shutdown` is checked
    /// before each node, and an action already started is allowed to finish.
    pub async fn reconcile(
        &mut self,
        snapshot: &ClusterSnapshot,
        shutdown: &watch::Receiver<bool>,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for node in &self.nodes {
            if *shutdown.borrow() {
                debug!(node = %node.name, "shutdown requested, stopping reconcile pass");
                report.interrupted = true;
                break;
            }

            let role = snapshot.role(node.index);
            let state = self.admin.node_state(node.index).await;
            report.observed.insert(node.index, state);
            track_readability(&mut self.unreadable, node, state);

            let Some(action) = decide(node.index, role, state.membership) else {
                self.failures.record_success(node.index);
                continue;
            };

            let result = match action {
                ConvergenceAction::Attach(index) => {
                    info!(
                        node = %node.name,
                        coordinator = %role,
                        proxy_status = %state.membership,
                        "attaching backend"
                    );
                    self.admin.attach(index).await
                }
                ConvergenceAction::Detach(index) => {
                    info!(
                        node = %node.name,
                        coordinator = %role,
                        proxy_status = %state.membership,
                        "detaching backend"
                    );
                    self.admin.detach(index).await
                }
            };

            match result {
                Ok(()) => {
                    self.failures.record_success(node.index);
                    report.applied.push(action);
                }
                Err(e) => {
                    let failures = self.failures.record_failure(node.index);
                    if self.failures.is_sustained(failures) {
                        error!(node = %node.name, %action, failures, error = %e, "control action keeps failing");
                    } else {
                        warn!(node = %node.name, %action, failures, error = %e, "control action failed, will retry next cycle");
                    }
                    report.failed.push(action);
                }
            }
        }

        report
    }
}

/// Warn once when a node's proxy state stays unreadable for a sustained run.
fn track_readability(unreadable: &mut FailureStreaks, node: &BackendNode, state: ProxyNodeState) {
    if state.membership == MembershipStatus::Unknown {
        let misses = unreadable.record_failure(node.index);
        if unreadable.just_became_sustained(misses) {
            warn!(node = %node.name, misses, "proxy state unreadable");
        } else {
            debug!(node = %node.name, misses, "proxy state unknown");
        }
    } else {
        let ended = unreadable.record_success(node.index);
        if unreadable.is_sustained(ended) {
            info!(node = %node.name, misses = ended, status = %state.membership, "proxy state readable again");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use poolwarden_core::streak::DEFAULT_SUSTAINED_THRESHOLD;
    use poolwarden_core::ProxyRole;
    use poolwarden_pcp::{PcpError, PcpTool};

    use ConvergenceAction::{Attach, Detach};
    use MembershipStatus::{Down, Initializing, Quarantined, Up};
    use ObservedRole::{Primary, Standby, Unknown};

    /// In-memory proxy. Accepted actions change its state like pgpool would.
    struct FakeProxy {
        states: Mutex<HashMap<NodeIndex, MembershipStatus>>,
        failing: HashSet<NodeIndex>,
        queries: Mutex<Vec<NodeIndex>>,
        commands: Mutex<Vec<ConvergenceAction>>,
        /// Request shutdown while answering the query for this node.
        stop_at: Option<(NodeIndex, watch::Sender<bool>)>,
    }

    impl FakeProxy {
        fn new(states: &[(NodeIndex, MembershipStatus)]) -> Self {
            Self {
                states: Mutex::new(states.iter().copied().collect()),
                failing: HashSet::new(),
                queries: Mutex::new(Vec::new()),
                commands: Mutex::new(Vec::new()),
                stop_at: None,
            }
        }

        fn failing_on(mut self, index: NodeIndex) -> Self {
            self.failing.insert(index);
            self
        }

        fn set(&self, index: NodeIndex, status: MembershipStatus) {
            self.states.lock().unwrap().insert(index, status);
        }

        fn commands(&self) -> Vec<ConvergenceAction> {
            self.commands.lock().unwrap().clone()
        }

        fn apply(&self, action: ConvergenceAction) -> Result<(), PcpError> {
            self.commands.lock().unwrap().push(action);
            let (index, tool, status) = match action {
                Attach(i) => (i, PcpTool::AttachNode, Up),
                Detach(i) => (i, PcpTool::DetachNode, Down),
            };
            if self.failing.contains(&index) {
                return Err(PcpError::Failed {
                    tool,
                    code: Some(1),
                    stderr: "ERROR: connection refused".to_string(),
                });
            }
            self.set(index, status);
            Ok(())
        }
    }

    impl ProxyAdmin for FakeProxy {
        async fn node_state(&self, index: NodeIndex) -> ProxyNodeState {
            self.queries.lock().unwrap().push(index);
            if let Some((at, tx)) = &self.stop_at
                && *at == index
            {
                tx.send_replace(true);
            }
            match self.states.lock().unwrap().get(&index) {
                Some(status) => ProxyNodeState::new(*status, ProxyRole::Unknown),
                None => ProxyNodeState::unknown(),
            }
        }

        async fn attach(&self, index: NodeIndex) -> Result<(), PcpError> {
            self.apply(Attach(index))
        }

        async fn detach(&self, index: NodeIndex) -> Result<(), PcpError> {
            self.apply(Detach(index))
        }
    }

    fn nodes() -> Vec<BackendNode> {
        vec![
            BackendNode::new(0, "host1", 5432),
            BackendNode::new(1, "host2", 5432),
            BackendNode::new(2, "host3", 5432),
        ]
    }

    fn snapshot(roles: &[(NodeIndex, ObservedRole)]) -> ClusterSnapshot {
        roles.iter().copied().collect()
    }

    fn running() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[test]
    fn decision_table() {
        for role in [Primary, Standby] {
            assert_eq!(decide(0, role, Down), Some(Attach(0)));
            assert_eq!(decide(0, role, Initializing), Some(Attach(0)));
            assert_eq!(decide(0, role, Quarantined), Some(Attach(0)));
            assert_eq!(decide(0, role, MembershipStatus::Unknown), Some(Attach(0)));
            assert_eq!(decide(0, role, Up), None);
        }
        assert_eq!(decide(4, Unknown, Up), Some(Detach(4)));
        assert_eq!(decide(4, Unknown, Down), None);
        assert_eq!(decide(4, Unknown, Quarantined), None);
        assert_eq!(decide(4, Unknown, MembershipStatus::Unknown), None);
    }

    #[tokio::test]
    async fn repeated_passes_over_unchanged_state_issue_the_same_actions() {
        // Every action fails, so the proxy state never moves.
        let proxy = FakeProxy::new(&[(0, Down), (1, Up), (2, Up)])
            .failing_on(0)
            .failing_on(2);
        let mut reconciler = Reconciler::new(nodes(), proxy);
        let snap = snapshot(&[(0, Primary), (1, Standby), (2, Unknown)]);

        let first = reconciler.reconcile(&snap, &running()).await;
        let second = reconciler.reconcile(&snap, &running()).await;

        assert_eq!(first.failed, vec![Attach(0), Detach(2)]);
        assert!(first.applied.is_empty());
        assert_eq!(first.applied, second.applied);
        assert_eq!(first.failed, second.failed);
        assert_eq!(first.observed, second.observed);
        assert_eq!(
            reconciler.admin().commands(),
            vec![Attach(0), Detach(2), Attach(0), Detach(2)]
        );
    }

    #[tokio::test]
    async fn mixed_cluster_scenario() {
        let proxy = FakeProxy::new(&[(0, Down), (1, Up), (2, Up)]);
        let mut reconciler = Reconciler::new(nodes(), proxy);

        let report = reconciler
            .reconcile(&snapshot(&[(0, Primary), (1, Standby), (2, Unknown)]), &running())
            .await;

        assert_eq!(report.applied, vec![Attach(0), Detach(2)]);
        assert!(report.failed.is_empty());
        assert!(report.changed());
        assert_eq!(report.observed.len(), 3);
    }

    #[tokio::test]
    async fn partition_detaches_up_nodes_and_attaches_none() {
        let proxy = FakeProxy::new(&[(0, Up), (1, Down), (2, Up)]);
        let mut reconciler = Reconciler::new(nodes(), proxy);

        let report = reconciler
            .reconcile(&snapshot(&[(0, Unknown), (1, Unknown), (2, Unknown)]), &running())
            .await;

        assert_eq!(report.applied, vec![Detach(0), Detach(2)]);
        assert!(!report.applied.iter().any(|a| matches!(a, Attach(_))));
    }

    #[tokio::test]
    async fn second_pass_is_a_no_op_once_converged() {
        let proxy = FakeProxy::new(&[(0, Down), (1, Up), (2, Up)]);
        let mut reconciler = Reconciler::new(nodes(), proxy);
        let snap = snapshot(&[(0, Primary), (1, Standby), (2, Unknown)]);

        reconciler.reconcile(&snap, &running()).await;
        let report = reconciler.reconcile(&snap, &running()).await;

        assert!(!report.changed());
        // Attaching node 0 did not provoke a detach afterwards.
        assert_eq!(reconciler.admin().commands(), vec![Attach(0), Detach(2)]);
    }

    #[tokio::test]
    async fn recovered_node_gets_exactly_one_attach() {
        let proxy = FakeProxy::new(&[(0, Up), (1, Down), (2, Up)]);
        let mut reconciler = Reconciler::new(nodes(), proxy);

        let before = snapshot(&[(0, Primary), (1, Unknown), (2, Standby)]);
        assert!(!reconciler.reconcile(&before, &running()).await.changed());

        let after = snapshot(&[(0, Primary), (1, Standby), (2, Standby)]);
        let report = reconciler.reconcile(&after, &running()).await;
        assert_eq!(report.applied, vec![Attach(1)]);
        assert_eq!(reconciler.admin().commands(), vec![Attach(1)]);
    }

    #[tokio::test]
    async fn proxy_drift_is_corrected_under_unchanged_snapshot() {
        let proxy = FakeProxy::new(&[(0, Up), (1, Up), (2, Up)]);
        let mut reconciler = Reconciler::new(nodes(), proxy);
        let snap = snapshot(&[(0, Primary), (1, Standby), (2, Standby)]);

        assert!(!reconciler.reconcile(&snap, &running()).await.changed());

        // An operator detaches node 1 behind our back.
        reconciler.admin().set(1, Down);

        let report = reconciler.reconcile(&snap, &running()).await;
        assert_eq!(report.applied, vec![Attach(1)]);
    }

    #[tokio::test]
    async fn failing_node_does_not_block_others() {
        let proxy = FakeProxy::new(&[(0, Down), (1, Up), (2, Up)]).failing_on(0);
        let mut reconciler = Reconciler::new(nodes(), proxy);
        let snap = snapshot(&[(0, Primary), (1, Standby), (2, Unknown)]);

        let report = reconciler.reconcile(&snap, &running()).await;
        assert_eq!(report.failed, vec![Attach(0)]);
        assert_eq!(report.applied, vec![Detach(2)]);

        // The failed attach is simply tried again next cycle.
        let report = reconciler.reconcile(&snap, &running()).await;
        assert_eq!(report.failed, vec![Attach(0)]);
        assert!(report.applied.is_empty());
        assert_eq!(reconciler.failures.count(0), 2);
    }

    #[tokio::test]
    async fn unknown_proxy_state_triggers_attach_for_healthy_node() {
        let proxy = FakeProxy::new(&[(1, Up)]);
        let mut reconciler = Reconciler::new(nodes(), proxy);
        let snap = snapshot(&[(0, Standby), (1, Primary), (2, Unknown)]);

        let report = reconciler.reconcile(&snap, &running()).await;
        assert_eq!(report.applied, vec![Attach(0)]);
    }

    #[tokio::test]
    async fn shutdown_before_pass_skips_every_node() {
        let proxy = FakeProxy::new(&[(0, Down), (1, Down), (2, Down)]);
        let mut reconciler = Reconciler::new(nodes(), proxy);
        let (_tx, rx) = watch::channel(true);

        let report = reconciler
            .reconcile(&snapshot(&[(0, Primary), (1, Standby), (2, Standby)]), &rx)
            .await;

        assert!(report.interrupted);
        assert!(report.applied.is_empty());
        assert!(reconciler.admin().queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn shutdown_stops_between_nodes() {
        let (tx, rx) = watch::channel(false);
        let mut proxy = FakeProxy::new(&[(0, Down), (1, Down), (2, Down)]);
        proxy.stop_at = Some((0, tx));
        let mut reconciler = Reconciler::new(nodes(), proxy);

        let report = reconciler
            .reconcile(&snapshot(&[(0, Primary), (1, Standby), (2, Standby)]), &rx)
            .await;

        assert!(report.interrupted);
        // The action already decided for node 0 still runs.
        assert_eq!(report.applied, vec![Attach(0)]);
        assert_eq!(*reconciler.admin().queries.lock().unwrap(), vec![0]);
        assert_eq!(reconciler.admin().commands(), vec![Attach(0)]);
    }

    #[tokio::test]
    async fn unreadable_proxy_state_escalates_then_recovers() {
        // No state known for node 1 while the coordinator can't see it either:
        // nothing to do, but the blind spot is tracked.
        let proxy = FakeProxy::new(&[(0, Up), (2, Up)]);
        let mut reconciler = Reconciler::new(nodes(), proxy);
        let snap = snapshot(&[(0, Primary), (1, Unknown), (2, Standby)]);

        for pass in 1..=DEFAULT_SUSTAINED_THRESHOLD {
            let report = reconciler.reconcile(&snap, &running()).await;
            assert!(!report.changed());
            assert!(report.failed.is_empty());
            assert_eq!(reconciler.unreadable.count(1), pass);
        }
        assert!(reconciler.unreadable.is_sustained(reconciler.unreadable.count(1)));
        assert_eq!(reconciler.unreadable.count(0), 0);

        reconciler.admin().set(1, Down);
        reconciler.reconcile(&snap, &running()).await;
        assert_eq!(reconciler.unreadable.count(1), 0);
    }
}
