//! `pcp_node_info` output parsing.
//!
//! The tool prints one whitespace-delimited line per backend:
//!
//! ```text
//! pg-1.internal 5432 1 0.500000 1 ...
//! ^host         ^port ^status   ^role
//! ```
//!
//! Field 2 is the status code, field 4 the role (numeric or by name).

use poolwarden_core::{MembershipStatus, ProxyNodeState, ProxyRole};

const STATUS_FIELD: usize = 2;
const ROLE_FIELD: usize = 4;

/// Parse `pcp_node_info` output. Returns `None` for malformed output.
pub fn parse_node_info(output: &str) -> Option<ProxyNodeState> {
    let line = output.lines().find(|l| !l.trim().is_empty())?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() <= ROLE_FIELD {
        return None;
    }

    let status: i64 = fields[STATUS_FIELD].parse().ok()?;
    Some(ProxyNodeState::new(
        MembershipStatus::from_code(status),
        ProxyRole::from_field(fields[ROLE_FIELD]),
    ))
}
