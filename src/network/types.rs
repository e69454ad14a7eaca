use crate::session_management::Session;
use std::net::IpAddr;
use std::time::Duration;
use tokio::net::TcpStream;

/// An established session together with its duplex stream.
///
/// Generic over the stream so the workload engine can be driven by in-memory pipes in tests.
pub struct Connection<S = TcpStream> {
    pub session: Session,
    pub stream: S,
}

/// Retry budget and local binding of a client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Local address to bind (port 0) before connecting.
    pub bind: Option<IpAddr>,
    /// Attempts after the first failed one.
    pub retries: u32,
    pub retry_backoff: Duration,
    /// Upper bound of a single attempt.
    pub connect_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            bind: None,
            retries: 3,
            retry_backoff: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
        }
    }
}
