//! TCP readiness probe.

use std::time::Duration;

use tokio::net::TcpStream;

/// Per-attempt connect timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Try a single TCP connect to `host:port`.
pub async fn port_open(host: &str, port: u16) -> bool {
    matches!(
        tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}
