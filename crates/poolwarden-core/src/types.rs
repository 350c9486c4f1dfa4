//! Domain types for the reconciler.
//!
//! Nothing here is persisted. Backend nodes are parsed once at startup;
//! everything else is rebuilt from live queries on every poll cycle.

use std::collections::BTreeMap;
use std::fmt;

/// Index of a backend inside the proxy (matches pgpool's `backend_hostnameN`).
pub type NodeIndex = u32;

// ── BackendNode ────────────────────────────────────────────────────

/// A backend database node from the static node list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendNode {
    pub index: NodeIndex,
    /// Short name derived from the host (first DNS label).
    pub name: String,
    pub host: String,
    /// Database port. Informational only; the coordinator is queried on
    /// its own port.
    pub port: u16,
}

impl BackendNode {
    /// Create a node, deriving its name from the host.
    pub fn new(index: NodeIndex, host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let name = host.split('.').next().unwrap_or(&host).to_string();
        Self {
            index,
            name,
            host,
            port,
        }
    }
}

// ── ObservedRole ───────────────────────────────────────────────────

/// A node's replication role as reported by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObservedRole {
    Primary,
    Standby,
    /// Unreachable, malformed response, or no role reported.
    Unknown,
}

impl ObservedRole {
    /// Normalize a coordinator role string.
    ///
    /// `master`/`primary` map to [`Primary`](Self::Primary),
    /// `replica`/`standby` to [`Standby`](Self::Standby), anything else
    /// (including a missing role) to [`Unknown`](Self::Unknown).
    pub fn from_coordinator(role: Option<&str>) -> Self {
        let Some(role) = role else {
            return Self::Unknown;
        };
        match role.trim().to_ascii_lowercase().as_str() {
            "master" | "primary" => Self::Primary,
            "replica" | "standby" => Self::Standby,
            _ => Self::Unknown,
        }
    }

    /// Whether the coordinator considers the node healthy.
    pub fn is_healthy(self) -> bool {
        matches!(self, Self::Primary | Self::Standby)
    }
}

impl fmt::Display for ObservedRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Primary => "primary",
            Self::Standby => "standby",
            Self::Unknown => "unknown",
        })
    }
}

// ── ProxyNodeState ─────────────────────────────────────────────────

/// Backend membership status inside the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MembershipStatus {
    Initializing,
    Up,
    Down,
    Quarantined,
    Unknown,
}

impl MembershipStatus {
    /// Map a PCP status code.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Initializing,
            1 => Self::Up,
            2 => Self::Down,
            3 => Self::Quarantined,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for MembershipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Initializing => "initializing",
            Self::Up => "up",
            Self::Down => "down",
            Self::Quarantined => "quarantined",
            Self::Unknown => "unknown",
        })
    }
}

/// Role the proxy believes a backend holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyRole {
    Standby,
    Primary,
    Unknown,
}

impl ProxyRole {
    /// Map a PCP role field, either numeric (`0`/`1`) or textual.
    pub fn from_field(field: &str) -> Self {
        match field.trim().to_ascii_lowercase().as_str() {
            "0" | "standby" | "replica" => Self::Standby,
            "1" | "primary" | "master" => Self::Primary,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ProxyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Standby => "standby",
            Self::Primary => "primary",
            Self::Unknown => "unknown",
        })
    }
}

/// A backend's state as seen through the proxy's control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyNodeState {
    pub membership: MembershipStatus,
    pub role: ProxyRole,
}

impl ProxyNodeState {
    pub fn new(membership: MembershipStatus, role: ProxyRole) -> Self {
        Self { membership, role }
    }

    /// State reported when the control channel could not be queried.
    pub fn unknown() -> Self {
        Self::new(MembershipStatus::Unknown, ProxyRole::Unknown)
    }
}

// ── ClusterSnapshot ────────────────────────────────────────────────

/// Who the coordinator reports as leader in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Leader {
    /// Exactly one primary.
    Single(NodeIndex),
    /// No node reports primary.
    None,
    /// More than one node reports primary; no definitive leader.
    Multiple(Vec<NodeIndex>),
}

/// One poll's view of the coordinator: node index → observed role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterSnapshot {
    roles: BTreeMap<NodeIndex, ObservedRole>,
}

impl ClusterSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, index: NodeIndex, role: ObservedRole) {
        self.roles.insert(index, role);
    }

    /// Role for a node. Nodes missing from the snapshot are `Unknown`.
    pub fn role(&self, index: NodeIndex) -> ObservedRole {
        self.roles
            .get(&index)
            .copied()
            .unwrap_or(ObservedRole::Unknown)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeIndex, ObservedRole)> + '_ {
        self.roles.iter().map(|(i, r)| (*i, *r))
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// Number of nodes the coordinator reports as primary or standby.
    pub fn healthy_count(&self) -> usize {
        self.roles.values().filter(|r| r.is_healthy()).count()
    }

    pub fn leader(&self) -> Leader {
        let primaries: Vec<NodeIndex> = self
            .roles
            .iter()
            .filter(|(_, r)| **r == ObservedRole::Primary)
            .map(|(i, _)| *i)
            .collect();
        match primaries.as_slice() {
            [] => Leader::None,
            [single] => Leader::Single(*single),
            _ => Leader::Multiple(primaries),
        }
    }
}

impl FromIterator<(NodeIndex, ObservedRole)> for ClusterSnapshot {
    fn from_iter<T: IntoIterator<Item = (NodeIndex, ObservedRole)>>(iter: T) -> Self {
        Self {
            roles: iter.into_iter().collect(),
        }
    }
}

// ── ConvergenceAction ──────────────────────────────────────────────

/// A control action needed to bring the proxy in line with the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConvergenceAction {
    Attach(NodeIndex),
    Detach(NodeIndex),
}

impl ConvergenceAction {
    pub fn index(&self) -> NodeIndex {
        match self {
            Self::Attach(i) | Self::Detach(i) => *i,
        }
    }
}

impl fmt::Display for ConvergenceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attach(i) => write!(f, "attach({i})"),
            Self::Detach(i) => write!(f, "detach({i})"),
        }
    }
}
