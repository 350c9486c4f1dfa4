//! Parsers for the configuration surface.
//!
//! The daemon reads raw strings from flags / environment; these helpers
//! turn them into validated values.

use std::collections::HashSet;
use std::time::Duration;

use crate::error::ConfigError;
use crate::types::{BackendNode, NodeIndex};

/// Parse a backend node list: `"0:host1:5432,1:host2:5432,..."`.
///
/// Blank entries (e.g. a trailing comma) are ignored. Any other malformed
/// entry, a duplicate index, or an empty result is an error.
pub fn parse_backend_nodes(s: &str) -> Result<Vec<BackendNode>, ConfigError> {
    let mut nodes = Vec::new();
    let mut seen = HashSet::new();

    for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let node = parse_backend_node(entry)?;
        if !seen.insert(node.index) {
            return Err(ConfigError::DuplicateIndex(node.index));
        }
        nodes.push(node);
    }

    if nodes.is_empty() {
        return Err(ConfigError::EmptyNodeList);
    }
    Ok(nodes)
}

fn parse_backend_node(entry: &str) -> Result<BackendNode, ConfigError> {
    let malformed = |reason: &str| ConfigError::MalformedNode {
        entry: entry.to_string(),
        reason: reason.to_string(),
    };

    let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
    let [index, host, port] = parts.as_slice() else {
        return Err(malformed("expected index:host:port"));
    };

    let index: NodeIndex = index.parse().map_err(|_| malformed("invalid index"))?;
    if host.is_empty() {
        return Err(malformed("empty host"));
    }
    let port: u16 = port.parse().map_err(|_| malformed("invalid port"))?;

    Ok(BackendNode::new(index, *host, port))
}

/// Parse a duration flag: `500ms`, `3s`, `2m`, or a bare number of seconds.
///
/// Returns `None` for anything else, including values too large to
/// represent.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        return ms.parse::<u64>().ok().map(Duration::from_millis);
    }
    let (digits, unit_secs) = if let Some(secs) = s.strip_suffix('s') {
        (secs, 1)
    } else if let Some(mins) = s.strip_suffix('m') {
        (mins, 60)
    } else {
        (s, 1)
    };
    let n: u64 = digits.parse().ok()?;
    n.checked_mul(unit_secs).map(Duration::from_secs)
}
