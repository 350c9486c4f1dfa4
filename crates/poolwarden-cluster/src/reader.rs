//! Builds one coordinator snapshot per poll, querying each node in turn.

use tracing::{debug, info, warn};

use poolwarden_core::{BackendNode, ClusterSnapshot, FailureStreaks, ObservedRole};

use crate::probe::RoleProbe;

/// Builds a [`ClusterSnapshot`] from the coordinator on every call.
///
/// Nodes are queried sequentially. The only state kept between calls is
/// the per-node miss streak used to choose a log level.
pub struct ClusterStateReader<P> {
    nodes: Vec<BackendNode>,
    probe: P,
    misses: FailureStreaks,
}

impl<P: RoleProbe> ClusterStateReader<P> {
    pub fn new(nodes: Vec<BackendNode>, probe: P) -> Self {
        Self {
            nodes,
            probe,
            misses: FailureStreaks::default(),
        }
    }

    /// Override the number of consecutive misses before warning.
    pub fn with_miss_threshold(mut self, threshold: u32) -> Self {
        self.misses = FailureStreaks::new(threshold);
        self
    }

    pub fn nodes(&self) -> &[BackendNode] {
        &self.nodes
    }

    /// Query every node and classify its role.
    ///
    /// Always yields exactly one entry per configured node. Probe failures
    /// become [`ObservedRole::Unknown`].
    pub async fn snapshot(&mut self) -> ClusterSnapshot {
        let mut snapshot = ClusterSnapshot::new();

        for node in &self.nodes {
            let (role, reason) = match self.probe.fetch_role(node).await {
                Ok(Some(raw)) => {
                    let role = ObservedRole::from_coordinator(Some(&raw));
                    if role == ObservedRole::Unknown {
                        debug!(node = %node.name, role = %raw, "unrecognized coordinator role");
                    }
                    (role, format!("role '{raw}'"))
                }
                Ok(None) => (ObservedRole::Unknown, "no role reported".to_string()),
                Err(e) => (ObservedRole::Unknown, e.to_string()),
            };

            if role.is_healthy() {
                let ended = self.misses.record_success(node.index);
                if self.misses.is_sustained(ended) {
                    info!(node = %node.name, misses = ended, %role, "coordinator reachable again");
                }
            } else {
                let misses = self.misses.record_failure(node.index);
                if self.misses.just_became_sustained(misses) {
                    warn!(node = %node.name, host = %node.host, misses, %reason, "node unhealthy per coordinator");
                } else {
                    debug!(node = %node.name, host = %node.host, misses, %reason, "coordinator miss");
                }
            }

            snapshot.insert(node.index, role);
        }

        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use poolwarden_core::Leader;

    use crate::probe::ProbeError;

    #[derive(Clone, Copy)]
    enum Answer {
        Role(&'static str),
        NoRole,
        Unreachable,
    }

    struct FakeProbe {
        answers: HashMap<&'static str, Answer>,
    }

    impl FakeProbe {
        fn new(answers: &[(&'static str, Answer)]) -> Self {
            Self {
                answers: answers.iter().copied().collect(),
            }
        }
    }

    impl RoleProbe for FakeProbe {
        async fn fetch_role(&self, node: &BackendNode) -> Result<Option<String>, ProbeError> {
            match self.answers.get(node.host.as_str()) {
                Some(Answer::Role(r)) => Ok(Some(r.to_string())),
                Some(Answer::NoRole) => Ok(None),
                Some(Answer::Unreachable) | None => Err(ProbeError::Timeout(Duration::from_secs(3))),
            }
        }
    }

    fn three_nodes() -> Vec<BackendNode> {
        vec![
            BackendNode::new(0, "host1", 5432),
            BackendNode::new(1, "host2", 5432),
            BackendNode::new(2, "host3", 5432),
        ]
    }

    #[tokio::test]
    async fn classifies_every_node() {
        let probe = FakeProbe::new(&[
            ("host1", Answer::Role("master")),
            ("host2", Answer::Role("replica")),
            ("host3", Answer::Unreachable),
        ]);
        let mut reader = ClusterStateReader::new(three_nodes(), probe);

        let snapshot = reader.snapshot().await;
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.role(0), ObservedRole::Primary);
        assert_eq!(snapshot.role(1), ObservedRole::Standby);
        assert_eq!(snapshot.role(2), ObservedRole::Unknown);
        assert_eq!(snapshot.leader(), Leader::Single(0));
    }

    #[tokio::test]
    async fn one_unreachable_node_does_not_affect_others() {
        let probe = FakeProbe::new(&[
            ("host1", Answer::Unreachable),
            ("host2", Answer::Role("primary")),
        ]);
        let nodes = vec![BackendNode::new(0, "host1", 5432), BackendNode::new(1, "host2", 5432)];
        let mut reader = ClusterStateReader::new(nodes, probe);

        let snapshot = reader.snapshot().await;
        assert_eq!(snapshot.role(0), ObservedRole::Unknown);
        assert_eq!(snapshot.role(1), ObservedRole::Primary);
    }

    #[tokio::test]
    async fn partition_yields_all_unknown() {
        let probe = FakeProbe::new(&[]);
        let mut reader = ClusterStateReader::new(three_nodes(), probe);

        let snapshot = reader.snapshot().await;
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot.iter().all(|(_, r)| r == ObservedRole::Unknown));
        assert_eq!(snapshot.healthy_count(), 0);
        assert_eq!(snapshot.leader(), Leader::None);
    }

    #[tokio::test]
    async fn missing_or_unrecognized_role_is_unknown() {
        let probe = FakeProbe::new(&[
            ("host1", Answer::NoRole),
            ("host2", Answer::Role("uninitialized")),
            ("host3", Answer::Role("standby")),
        ]);
        let mut reader = ClusterStateReader::new(three_nodes(), probe);

        let snapshot = reader.snapshot().await;
        assert_eq!(snapshot.role(0), ObservedRole::Unknown);
        assert_eq!(snapshot.role(1), ObservedRole::Unknown);
        assert_eq!(snapshot.role(2), ObservedRole::Standby);
    }

    #[tokio::test]
    async fn tracks_miss_streaks_across_polls() {
        let probe = FakeProbe::new(&[("host1", Answer::Role("primary"))]);
        let mut reader = ClusterStateReader::new(three_nodes(), probe).with_miss_threshold(2);

        reader.snapshot().await;
        reader.snapshot().await;
        assert_eq!(reader.misses.count(0), 0);
        assert_eq!(reader.misses.count(1), 2);
        assert_eq!(reader.misses.count(2), 2);
    }
}
