//! The proxy administration seam.

use std::future::Future;

use poolwarden_core::{NodeIndex, ProxyNodeState};

use crate::client::PcpError;

/// Query and mutate per-backend membership in the proxy.
///
/// Implementations absorb transient failures themselves: `node_state`
/// degrades to [`ProxyNodeState::unknown`] and the mutating calls return
/// an error only once their retries are exhausted.
pub trait ProxyAdmin {
    /// Current membership status and role of a backend.
    fn node_state(&self, index: NodeIndex) -> impl Future<Output = ProxyNodeState> + Send;

    /// Mark a backend in-service.
    fn attach(&self, index: NodeIndex) -> impl Future<Output = Result<(), PcpError>> + Send;

    /// Mark a backend out-of-service.
    fn detach(&self, index: NodeIndex) -> impl Future<Output = Result<(), PcpError>> + Send;
}
