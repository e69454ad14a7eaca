//! # Connection Manager Module
//!
//! Sets up and tears down the TCP sessions of a benchmark run.
//!
//! ```text
//! server                                   client
//! ┌───────────────────────┐                ┌────────────────────────────┐
//! │ listen()              │                │ connect()                  │
//! │ - SO_REUSEADDR        │◀───────────────│ - optional bind (ip, 0)    │
//! │ - bind + listen       │                │ - timeout per attempt      │
//! │ Listener::accept()    │                │ - backoff between attempts │
//! │ - up to max_clients   │                └────────────────────────────┘
//! └───────────────────────┘
//! ```
//!
//! Both sides hand out a [`Connection`] whose [`Session`] is already `Established`. Sockets
//! are owned by the returned values, so dropping them closes the socket on every path.

use super::types::{ConnectOptions, Connection};
use crate::error_handling::types::ConnectionError;
use crate::session_management::{Role, Session};
use log::{debug, error, info, warn};
use std::io;
use std::net::SocketAddr;
use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

const LISTEN_BACKLOG: u32 = 128;

pub struct ConnectionManager;

/// A bound listening socket that accepts up to `max_clients` sessions.
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
    endpoint: String,
    accepted: usize,
    /// 0 means no limit.
    max_clients: usize,
}

impl ConnectionManager {
    /// Binds a listening socket on `bind:port`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Resolve`] if `bind` is not a valid local address, and
    /// [`ConnectionError::Bind`] / [`ConnectionError::Listen`] if the socket can't be set up
    /// (port in use, privileged port, no such interface).
    pub async fn listen(
        bind: &str,
        port: u16,
        max_clients: usize,
    ) -> Result<Listener, ConnectionError> {
        let endpoint = format!("{}:{}", bind, port);
        let addr = resolve(bind, port).await?;

        let socket = new_socket(&addr).map_err(|e| {
            error!("[!] Could not create socket: {}", e);
            ConnectionError::Bind(addr, e)
        })?;
        // Reuse a local address still in TIME_WAIT from a previous run.
        socket
            .set_reuseaddr(true)
            .map_err(|e| ConnectionError::Bind(addr, e))?;
        socket.bind(addr).map_err(|e| {
            error!("[!] Unable to bind on {}: {}", addr, e);
            ConnectionError::Bind(addr, e)
        })?;
        let inner = socket.listen(LISTEN_BACKLOG).map_err(|e| {
            error!("[!] Unable to listen on {}: {}", addr, e);
            ConnectionError::Listen(addr, e)
        })?;
        let local_addr = inner
            .local_addr()
            .map_err(|e| ConnectionError::Listen(addr, e))?;

        info!("Listening socket bound to {}", local_addr);
        Ok(Listener {
            inner,
            local_addr,
            endpoint,
            accepted: 0,
            max_clients,
        })
    }

    /// Connects to `address:port`, retrying with a fixed backoff.
    ///
    /// Makes `1 + options.retries` attempts, each bounded by `options.connect_timeout`. Name
    /// resolution is part of every attempt, so a resolver hiccup is retried too.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::RetriesExhausted`] once the budget is spent, carrying the
    /// last failure.
    pub async fn connect(
        address: &str,
        port: u16,
        options: &ConnectOptions,
    ) -> Result<Connection, ConnectionError> {
        let endpoint = format!("{}:{}", address, port);
        let mut session = Session::new(Role::Client, endpoint.clone());
        let attempts = options.retries.saturating_add(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            info!(
                "Connecting to server {} (attempt {}/{})",
                endpoint, attempt, attempts
            );
            match timeout(options.connect_timeout, try_connect(address, port, options)).await {
                Ok(Ok(stream)) => {
                    let local = stream
                        .local_addr()
                        .map_err(ConnectionError::Accept)?;
                    let peer = stream
                        .peer_addr()
                        .map_err(ConnectionError::Accept)?;
                    if let Err(e) = session.establish(local, peer) {
                        warn!("[{}] {}", session.id, e);
                    }
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("[{}] TCP_NODELAY not set: {}", session.id, e);
                    }
                    info!("[{}] Connection established {} -> {}", session.id, local, peer);
                    return Ok(Connection { session, stream });
                }
                Ok(Err(e)) => {
                    warn!("Could not connect to the server {}: {}", endpoint, e);
                    last_error = e.to_string();
                }
                Err(_) => {
                    warn!(
                        "Connecting to {} timed out after {:?}",
                        endpoint, options.connect_timeout
                    );
                    last_error = format!("timed out after {:?}", options.connect_timeout);
                }
            }

            if attempt < attempts {
                sleep(options.retry_backoff).await;
            }
        }

        if let Err(e) = session.fail() {
            warn!("[{}] {}", session.id, e);
        }
        error!("[!] Giving up on {} after {} attempt(s)", endpoint, attempts);
        Err(ConnectionError::RetriesExhausted {
            address: endpoint,
            attempts,
            last_error,
        })
    }
}

impl Listener {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn accepted(&self) -> usize {
        self.accepted
    }

    /// `true` once `max_clients` sessions were handed out.
    pub fn is_exhausted(&self) -> bool {
        self.max_clients != 0 && self.accepted >= self.max_clients
    }

    /// Waits for the next client. Returns `Ok(None)` when the listener is exhausted or the
    /// shutdown signal fires first.
    pub async fn accept(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<Connection>, ConnectionError> {
        if self.is_exhausted() || *shutdown.borrow() {
            return Ok(None);
        }

        let (stream, peer) = tokio::select! {
            res = self.inner.accept() => res.map_err(|e| {
                error!("[!] Unable to accept: {}", e);
                ConnectionError::Accept(e)
            })?,
            _ = crate::workload::engine::cancelled(shutdown) => {
                info!("Stopped accepting connections on {}", self.local_addr);
                return Ok(None);
            }
        };

        let mut session = Session::new(Role::Server, self.endpoint.clone());
        let local = stream.local_addr().map_err(ConnectionError::Accept)?;
        if let Err(e) = session.establish(local, peer) {
            warn!("[{}] {}", session.id, e);
        }
        if let Err(e) = stream.set_nodelay(true) {
            debug!("[{}] TCP_NODELAY not set: {}", session.id, e);
        }
        self.accepted += 1;
        info!(
            "[{}] Accepted incoming connection from {} ({} so far)",
            session.id, peer, self.accepted
        );
        Ok(Some(Connection { session, stream }))
    }
}

fn new_socket(addr: &SocketAddr) -> io::Result<TcpSocket> {
    if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, ConnectionError> {
    let mut addrs = lookup_host((host, port))
        .await
        .map_err(|e| ConnectionError::Resolve(host.to_string(), e))?;
    addrs.next().ok_or_else(|| {
        ConnectionError::Resolve(
            host.to_string(),
            io::Error::new(io::ErrorKind::NotFound, "no address found"),
        )
    })
}

async fn try_connect(host: &str, port: u16, options: &ConnectOptions) -> io::Result<TcpStream> {
    let mut last = io::Error::new(io::ErrorKind::NotFound, "no address found");
    for addr in lookup_host((host, port)).await? {
        let socket = new_socket(&addr)?;
        if let Some(bind) = options.bind {
            if bind.is_ipv4() != addr.is_ipv4() {
                continue;
            }
            // Port 0 lets the kernel pick the source port on the chosen interface.
            socket.bind(SocketAddr::new(bind, 0))?;
        }
        match socket.connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("connect to {} failed: {}", addr, e);
                last = e;
            }
        }
    }
    Err(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_management::SessionState;
    use std::time::{Duration, Instant};

    fn fast_retries(retries: u32) -> ConnectOptions {
        ConnectOptions {
            bind: None,
            retries,
            retry_backoff: Duration::from_millis(20),
            connect_timeout: Duration::from_millis(500),
        }
    }

    /// A loopback port with nothing listening on it.
    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_server_accepts_exactly_one_client() {
        let (_tx, mut shutdown) = watch::channel(false);
        let mut listener = ConnectionManager::listen("127.0.0.1", 0, 1).await.unwrap();
        let port = listener.local_addr().port();

        let client = tokio::spawn(async move {
            ConnectionManager::connect("127.0.0.1", port, &fast_retries(3)).await
        });

        let accepted = listener.accept(&mut shutdown).await.unwrap().unwrap();
        assert_eq!(accepted.session.state(), SessionState::Established);
        assert_eq!(accepted.session.role, Role::Server);
        assert!(listener.is_exhausted());
        assert!(listener.accept(&mut shutdown).await.unwrap().is_none());

        let connected = client.await.unwrap().unwrap();
        assert_eq!(connected.session.state(), SessionState::Established);
        assert_eq!(connected.session.peer_addr, Some(listener.local_addr()));
        assert_eq!(
            accepted.session.peer_addr,
            connected.session.local_addr,
            "both ends agree on the client address"
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_exhausts_retries() {
        let port = closed_port().await;
        let started = Instant::now();
        let err = ConnectionManager::connect("127.0.0.1", port, &fast_retries(3))
            .await
            .err()
            .expect("nothing listens on the port");

        match err {
            ConnectionError::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 4),
            other => panic!("unexpected error {:?}", other),
        }
        // Three backoffs separate the four attempts.
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_client_retries_until_server_comes_up() {
        let port = closed_port().await;
        let server = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let (_tx, mut shutdown) = watch::channel(false);
            let mut listener = ConnectionManager::listen("127.0.0.1", port, 1).await.unwrap();
            listener.accept(&mut shutdown).await.unwrap().unwrap()
        });

        let options = ConnectOptions {
            retries: 20,
            ..fast_retries(0)
        };
        let connection = ConnectionManager::connect("127.0.0.1", port, &options)
            .await
            .unwrap();
        assert!(connection.session.is_established());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_before_connect_uses_local_interface() {
        let (_tx, mut shutdown) = watch::channel(false);
        let mut listener = ConnectionManager::listen("127.0.0.1", 0, 1).await.unwrap();
        let port = listener.local_addr().port();
        let options = ConnectOptions {
            bind: Some("127.0.0.1".parse().unwrap()),
            ..fast_retries(0)
        };

        let client =
            tokio::spawn(async move { ConnectionManager::connect("127.0.0.1", port, &options).await });
        let _server_side = listener.accept(&mut shutdown).await.unwrap().unwrap();
        let connection = client.await.unwrap().unwrap();
        let local = connection.session.local_addr.unwrap();
        assert_eq!(local.ip().to_string(), "127.0.0.1");
        assert_ne!(local.port(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_accept() {
        let (tx, mut shutdown) = watch::channel(false);
        let mut listener = ConnectionManager::listen("127.0.0.1", 0, 0).await.unwrap();

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(true).unwrap();
            tx
        });

        let res = tokio::time::timeout(Duration::from_secs(2), listener.accept(&mut shutdown))
            .await
            .expect("accept returns after shutdown");
        assert!(res.unwrap().is_none());
        assert_eq!(listener.accepted(), 0);
        drop(stopper.await.unwrap());
    }

    #[tokio::test]
    async fn test_port_in_use_is_a_bind_error() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let err = ConnectionManager::listen("127.0.0.1", port, 1)
            .await
            .err()
            .expect("port is taken");
        assert!(matches!(err, ConnectionError::Bind(_, _)));
    }
}
