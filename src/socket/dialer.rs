//! Raw stream establishment.
//!
//! [`Dial`] is the seam between the transport manager and whatever gets
//! bytes to a `host:port`: a direct TCP connection, a CONNECT tunnel or a
//! SOCKS proxy. Implementations must be thread-safe and may be called
//! concurrently for the same address.

use crate::base::neterror::NetError;
use crate::socket::stream::BoxedSocket;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

/// Alias for the `Future` type returned by a dialer.
pub type Dialing = Pin<Box<dyn Future<Output = Result<BoxedSocket, NetError>> + Send>>;

/// Establishes a bidirectional byte stream to `addr` (`host:port`).
pub trait Dial: Send + Sync {
    fn dial(&self, addr: &str) -> Dialing;
}

impl<D: Dial + ?Sized> Dial for Arc<D> {
    fn dial(&self, addr: &str) -> Dialing {
        (**self).dial(addr)
    }
}

/// Plain TCP dialer: resolve, then try each address in order.
#[derive(Debug, Clone, Default)]
pub struct DirectDialer {
    connect_timeout: Option<Duration>,
}

impl DirectDialer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Connects to `addr` and returns the bare [`TcpStream`].
    pub async fn connect(&self, addr: &str) -> Result<TcpStream, NetError> {
        match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connect_tcp(addr))
                .await
                .map_err(|_| {
                    tracing::debug!(addr = %addr, timeout = ?limit, "connect timed out");
                    NetError::ConnectionTimedOut
                })?,
            None => connect_tcp(addr).await,
        }
    }
}

impl Dial for DirectDialer {
    fn dial(&self, addr: &str) -> Dialing {
        let this = self.clone();
        let addr = addr.to_string();
        Box::pin(async move { this.connect(&addr).await.map(BoxedSocket::new) })
    }
}

async fn connect_tcp(addr: &str) -> Result<TcpStream, NetError> {
    let (host, _) = split_host_port(addr)?;
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host(addr)
        .await
        .map_err(|e| {
            tracing::debug!(domain = %host, error = %e, "DNS resolution failed");
            NetError::NameNotResolvedFor {
                domain: host.to_string(),
                source: Arc::new(e),
            }
        })?
        .collect();

    if addrs.is_empty() {
        return Err(NetError::NameNotResolvedFor {
            domain: host.to_string(),
            source: Arc::new(io::Error::new(
                io::ErrorKind::NotFound,
                "no addresses returned by resolver",
            )),
        });
    }

    let mut last_err = None;
    for sock_addr in addrs {
        match TcpStream::connect(sock_addr).await {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                tracing::debug!(addr = %addr, peer = %sock_addr, "tcp connected");
                return Ok(stream);
            }
            Err(e) => {
                tracing::trace!(peer = %sock_addr, error = %e, "tcp connect attempt failed");
                last_err = Some(e);
            }
        }
    }

    let err = last_err.unwrap_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable));
    Err(NetError::io("dial", addr, err))
}

/// Splits `host:port`, accepting bracketed IPv6 literals.
pub fn split_host_port(addr: &str) -> Result<(&str, u16), NetError> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| NetError::AddressInvalid(format!("{addr}: missing port")))?;
    let host = match host.strip_prefix('[') {
        Some(inner) => inner
            .strip_suffix(']')
            .ok_or_else(|| NetError::AddressInvalid(format!("{addr}: unbalanced brackets")))?,
        None => host,
    };
    if host.is_empty() {
        return Err(NetError::AddressInvalid(format!("{addr}: missing host")));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| NetError::AddressInvalid(format!("{addr}: invalid port")))?;
    Ok((host, port))
}

/// Joins host and port, bracketing IPv6 literals.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}
