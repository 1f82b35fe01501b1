//! Shared-port TCP listeners.
//!
//! # Responsibilities
//! - Resolve and bind the configured address
//! - Set SO_REUSEADDR and SO_REUSEPORT so every worker binds the same port
//! - Accept connections, telling transient accept errors from fatal ones
//!
//! # Design Decisions
//! - The kernel balances connections across workers; no userspace balancer
//! - Transient errors are reported as `Ok(None)` so the accept loop skips them

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

use tokio::net::{TcpListener, TcpSocket, TcpStream};

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Address did not resolve.
    Resolve(String),
    /// Failed to bind to address.
    Bind(io::Error),
    /// Failed to accept connection.
    Accept(io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Resolve(addr) => write!(f, "Failed to resolve {}", addr),
            ListenerError::Bind(e) => write!(f, "Failed to bind: {}", e),
            ListenerError::Accept(e) => write!(f, "Failed to accept: {}", e),
        }
    }
}

impl std::error::Error for ListenerError {}

/// Which surface a listener serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKind {
    /// Public port, open to everyone.
    Public,
    /// Internal-use port, restricted to the IP allow-list.
    Internal,
}

impl std::fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerKind::Public => f.write_str("public"),
            ListenerKind::Internal => f.write_str("internal"),
        }
    }
}

/// Resolve `host:port` to the first socket address.
pub fn resolve(host: &str, port: u16) -> Result<SocketAddr, ListenerError> {
    (host, port)
        .to_socket_addrs()
        .map_err(|_| ListenerError::Resolve(format!("{host}:{port}")))?
        .next()
        .ok_or_else(|| ListenerError::Resolve(format!("{host}:{port}")))
}

/// A TCP listener bound with port sharing.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    kind: ListenerKind,
}

impl Listener {
    /// Bind `addr` with SO_REUSEADDR and SO_REUSEPORT. Must be called from
    /// inside a tokio runtime.
    pub fn bind(addr: SocketAddr, backlog: u32, kind: ListenerKind) -> Result<Self, ListenerError> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(ListenerError::Bind)?;

        socket.set_reuseaddr(true).map_err(ListenerError::Bind)?;
        socket.set_reuseport(true).map_err(ListenerError::Bind)?;
        socket.bind(addr).map_err(ListenerError::Bind)?;
        let inner = socket.listen(backlog).map_err(ListenerError::Bind)?;

        tracing::info!(
            address = %inner.local_addr().map_err(ListenerError::Bind)?,
            kind = %kind,
            backlog,
            "Listener bound"
        );

        Ok(Self { inner, kind })
    }

    /// Accept one connection. `Ok(None)` means a transient error was
    /// logged and the caller should keep accepting.
    pub async fn accept(&self) -> Result<Option<(TcpStream, SocketAddr)>, ListenerError> {
        match self.inner.accept().await {
            Ok(conn) => Ok(Some(conn)),
            Err(e) if is_transient(&e) => {
                tracing::warn!(kind = %self.kind, error = %e, "Transient accept error");
                Ok(None)
            }
            Err(e) => Err(ListenerError::Accept(e)),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, io::Error> {
        self.inner.local_addr()
    }

    pub fn kind(&self) -> ListenerKind {
        self.kind
    }
}

/// Accept errors caused by a single peer rather than the listening socket.
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}
