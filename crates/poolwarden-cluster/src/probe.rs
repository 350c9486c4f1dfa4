//! Coordinator role probe.
//!
//! Performs `GET http://{host}:{port}/` against a node's Patroni REST API
//! and extracts the `role` field from the JSON body. The status code is
//! not trusted on its own: Patroni answers 503 on replicas for `/` but
//! still reports a perfectly usable body.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use poolwarden_core::BackendNode;

/// Default Patroni REST API port.
pub const DEFAULT_COORDINATOR_PORT: u16 = 8008;

/// Why a role probe produced no answer.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] hyper::Error),

    #[error("invalid request: {0}")]
    Request(#[from] http::Error),

    #[error("malformed response body: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Source of coordinator role strings for a node.
pub trait RoleProbe {
    /// Fetch the raw role string for `node`.
    ///
    /// `Ok(None)` means the coordinator answered but reported no role.
    fn fetch_role(
        &self,
        node: &BackendNode,
    ) -> impl Future<Output = Result<Option<String>, ProbeError>> + Send;
}

/// The subset of Patroni's status document we care about.
#[derive(Debug, Deserialize)]
struct StatusBody {
    role: Option<String>,
}

/// [`RoleProbe`] over Patroni's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpRoleProbe {
    port: u16,
    timeout: Duration,
}

impl HttpRoleProbe {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }

    async fn request_role(&self, host: &str) -> Result<Option<String>, ProbeError> {
        let address = format!("{host}:{}", self.port);

        let stream = tokio::net::TcpStream::connect((host, self.port)).await?;
        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("GET")
            .uri("/")
            .header("host", &address)
            .header("accept", "application/json")
            .header("user-agent", "poolwarden/0.1")
            .body(Empty::<Bytes>::new())?;

        let resp = sender.send_request(req).await?;
        let status = resp.status();
        let body = resp.into_body().collect().await?.to_bytes();

        if !status.is_success() {
            debug!(%status, %address, "coordinator returned non-2xx, reading body anyway");
        }

        parse_role(&body)
    }
}

impl RoleProbe for HttpRoleProbe {
    async fn fetch_role(&self, node: &BackendNode) -> Result<Option<String>, ProbeError> {
        match tokio::time::timeout(self.timeout, self.request_role(&node.host)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(self.timeout)),
        }
    }
}

/// Extract the role from a status body. Blank roles count as missing.
fn parse_role(body: &[u8]) -> Result<Option<String>, ProbeError> {
    let status: StatusBody = serde_json::from_slice(body)?;
    Ok(status.role.filter(|r| !r.trim().is_empty()))
}
