//! Proxy tunnel dialer.
//!
//! Produces a stream to a target address through an upstream proxy:
//! `CONNECT` over HTTP/1.1, `CONNECT` as an HTTP/2 stream (with the HTTP/2
//! connection shared across tunnels), or a SOCKS handshake. The result is
//! a [`TunnelStream`], erased to a plain [`BoxedSocket`] behind [`Dial`].

use crate::base::neterror::NetError;
use crate::http::h2settings::{H2Settings, Navigator};
use crate::socket::dialer::{split_host_port, Dial, DirectDialer, Dialing};
use crate::socket::h2stream::TunnelConnection;
use crate::socket::proxy::{ProxyEndpoint, ProxyType};
use crate::socket::socks::SocksDialer;
use crate::socket::stream::{BoxedSocket, TunnelStream};
use crate::socket::tls;
use boring::ssl::SslConnector;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, HOST, PROXY_AUTHORIZATION, USER_AGENT};
use http::{HeaderMap, Method, Request};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Alias for the `Future` returned by a proxy TLS hook: the handshaked
/// stream and the negotiated ALPN protocol.
pub type TlsDialing = Pin<Box<dyn Future<Output = Result<(BoxedSocket, String), NetError>> + Send>>;

/// Replaces the built-in TLS handshake to an `https` proxy. Must return a
/// stream with a completed handshake.
pub type DialTlsHook = Arc<dyn Fn(&str) -> TlsDialing + Send + Sync>;

const MAX_CONNECT_RESPONSE: usize = 64 * 1024;

type TunnelSlot = Arc<Mutex<Option<Arc<TunnelConnection>>>>;

/// Dials targets through a configured proxy.
#[derive(Clone)]
pub struct TunnelDialer {
    proxy: ProxyEndpoint,
    default_headers: HeaderMap,
    dialer: Arc<dyn Dial>,
    dial_tls: Option<DialTlsHook>,
    proxy_tls: Option<SslConnector>,
    h2_settings: H2Settings,
    h2_reuse: bool,
    cached: TunnelSlot,
}

impl TunnelDialer {
    /// Validates `proxy_url` and prepares the default CONNECT headers.
    pub fn new(proxy_url: &str, user_agent: &str) -> Result<Self, NetError> {
        let proxy = ProxyEndpoint::parse(proxy_url)?;

        let mut default_headers = HeaderMap::new();
        let ua = HeaderValue::from_str(user_agent)
            .map_err(|_| NetError::InvalidHeader(format!("user agent `{user_agent}`")))?;
        default_headers.insert(USER_AGENT, ua);

        if matches!(proxy.proxy_type(), ProxyType::Http | ProxyType::Https) {
            if let Some(auth) = proxy.basic_auth_header() {
                let mut value = HeaderValue::from_str(&auth)
                    .map_err(|_| NetError::InvalidHeader("proxy credentials".to_string()))?;
                value.set_sensitive(true);
                default_headers.insert(PROXY_AUTHORIZATION, value);
            }
        }

        let proxy_tls = match proxy.proxy_type() {
            ProxyType::Https => Some(tls::proxy_connector()?),
            _ => None,
        };

        Ok(Self {
            proxy,
            default_headers,
            dialer: Arc::new(DirectDialer::new()),
            dial_tls: None,
            proxy_tls,
            h2_settings: Navigator::from_user_agent(user_agent).h2_settings(),
            h2_reuse: true,
            cached: Arc::new(Mutex::new(None)),
        })
    }

    /// Dialer used to reach the proxy itself.
    pub fn with_dialer(mut self, dialer: Arc<dyn Dial>) -> Self {
        self.dialer = dialer;
        self
    }

    /// Custom TLS handshake to an `https` proxy.
    pub fn with_tls_dialer(mut self, hook: DialTlsHook) -> Self {
        self.dial_tls = Some(hook);
        self
    }

    /// Share one HTTP/2 proxy connection across tunnels (on by default).
    pub fn with_h2_reuse(mut self, enabled: bool) -> Self {
        self.h2_reuse = enabled;
        self
    }

    pub fn proxy(&self) -> &ProxyEndpoint {
        &self.proxy
    }

    pub fn default_headers(&self) -> &HeaderMap {
        &self.default_headers
    }

    /// Whether a reusable HTTP/2 proxy connection is cached.
    pub fn has_cached_tunnel(&self) -> bool {
        self.cached_tunnel().is_some()
    }

    /// Opens a tunnel to `addr`. Headers in `extra` replace default headers
    /// with the same name for this call only.
    pub async fn dial_with_headers(
        &self,
        addr: &str,
        extra: Option<&HeaderMap>,
    ) -> Result<BoxedSocket, NetError> {
        self.dial_tunnel(addr, extra).await.map(BoxedSocket::new)
    }

    /// Like [`dial_with_headers`](Self::dial_with_headers), keeping the
    /// tunnel's close operations.
    pub async fn dial_tunnel(
        &self,
        addr: &str,
        extra: Option<&HeaderMap>,
    ) -> Result<TunnelStream, NetError> {
        split_host_port(addr)?;

        if self.proxy.is_socks() {
            return SocksDialer::new(self.proxy.clone(), self.dialer.clone())
                .connect(addr)
                .await
                .map(TunnelStream::raw);
        }

        let headers = self.connect_headers(extra);

        if self.h2_reuse {
            if let Some(conn) = self.cached_tunnel() {
                match conn.open(connect_request(addr, &headers)?).await {
                    Ok(stream) => {
                        tracing::debug!(proxy = %self.proxy.address(), target = %addr, "reused HTTP/2 tunnel connection");
                        return Ok(TunnelStream::h2(stream));
                    }
                    Err(e) => {
                        tracing::debug!(proxy = %self.proxy.address(), target = %addr, error = %e, "cached HTTP/2 tunnel failed, dialing fresh");
                        self.evict_tunnel(&conn);
                        if !matches!(e, NetError::ProxyRejected { .. }) {
                            conn.close();
                        }
                    }
                }
            }
        }

        let (raw, alpn) = self.dial_proxy().await?;

        match alpn.as_str() {
            "" | "http/1.1" => self.connect_http1(raw, addr, &headers).await,
            "h2" => {
                let proxy_addr = self.proxy.address();
                let conn = TunnelConnection::handshake(raw, &self.h2_settings, &proxy_addr).await?;
                match conn.open(connect_request(addr, &headers)?).await {
                    Ok(stream) => {
                        tracing::debug!(proxy = %proxy_addr, target = %addr, "CONNECT accepted over HTTP/2");
                        if self.h2_reuse {
                            *self.cached.lock().unwrap_or_else(PoisonError::into_inner) =
                                Some(conn);
                        }
                        Ok(TunnelStream::h2(stream))
                    }
                    Err(e) => {
                        conn.close();
                        Err(e)
                    }
                }
            }
            other => {
                let mut raw = raw;
                let _ = raw.shutdown().await;
                tracing::debug!(proxy = %self.proxy.address(), alpn = %other, "proxy negotiated unsupported protocol");
                Err(NetError::AlpnNegotiationFailed(other.to_string()))
            }
        }
    }

    fn connect_headers(&self, extra: Option<&HeaderMap>) -> HeaderMap {
        let mut headers = self.default_headers.clone();
        if let Some(extra) = extra {
            for name in extra.keys() {
                headers.remove(name);
                for value in extra.get_all(name) {
                    headers.append(name.clone(), value.clone());
                }
            }
        }
        headers
    }

    fn cached_tunnel(&self) -> Option<Arc<TunnelConnection>> {
        let guard = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .as_ref()
            .filter(|conn| conn.can_take_new_request())
            .cloned()
    }

    fn evict_tunnel(&self, stale: &Arc<TunnelConnection>) {
        let mut guard = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.as_ref().is_some_and(|c| Arc::ptr_eq(c, stale)) {
            *guard = None;
        }
    }

    /// Connects to the proxy itself, returning the stream and its ALPN.
    async fn dial_proxy(&self) -> Result<(BoxedSocket, String), NetError> {
        let proxy_addr = self.proxy.address();
        match self.proxy.proxy_type() {
            ProxyType::Http => Ok((self.dialer.dial(&proxy_addr).await?, String::new())),
            ProxyType::Https => {
                if let Some(hook) = &self.dial_tls {
                    return hook(&proxy_addr).await;
                }
                let connector = self
                    .proxy_tls
                    .as_ref()
                    .ok_or(NetError::SslProtocolError)?;
                let raw = self.dialer.dial(&proxy_addr).await?;
                let stream = tls::handshake(connector, self.proxy.host(), true, raw).await?;
                let alpn = tls::negotiated_protocol(&stream);
                Ok((BoxedSocket::new(stream), alpn))
            }
            other => Err(NetError::UnsupportedProxyScheme(format!("{other:?}"))),
        }
    }

    async fn connect_http1(
        &self,
        mut raw: BoxedSocket,
        addr: &str,
        headers: &HeaderMap,
    ) -> Result<TunnelStream, NetError> {
        let proxy_addr = self.proxy.address();
        match http1_handshake(&mut raw, addr, headers, &proxy_addr).await {
            Ok(early) => {
                tracing::debug!(proxy = %proxy_addr, target = %addr, early = early.len(), "CONNECT accepted");
                Ok(TunnelStream::raw_with_prefix(raw, early))
            }
            Err(e) => {
                let _ = raw.shutdown().await;
                tracing::debug!(proxy = %proxy_addr, target = %addr, error = %e, "CONNECT failed");
                Err(e)
            }
        }
    }
}

impl Dial for TunnelDialer {
    fn dial(&self, addr: &str) -> Dialing {
        let this = self.clone();
        let addr = addr.to_string();
        Box::pin(async move { this.dial_with_headers(&addr, None).await })
    }
}

impl std::fmt::Debug for TunnelDialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelDialer")
            .field("proxy", &self.proxy.address())
            .field("kind", &self.proxy.proxy_type())
            .field("h2_reuse", &self.h2_reuse)
            .finish()
    }
}

fn connect_request(addr: &str, headers: &HeaderMap) -> Result<Request<()>, NetError> {
    let mut req = Request::builder()
        .method(Method::CONNECT)
        .uri(addr)
        .body(())
        .map_err(|_| NetError::AddressInvalid(addr.to_string()))?;
    *req.headers_mut() = headers.clone();
    req.headers_mut().remove(HOST);
    Ok(req)
}

/// Sends the CONNECT head and reads the reply head. Returns the bytes that
/// arrived after the head, which already belong to the tunnel.
async fn http1_handshake(
    raw: &mut BoxedSocket,
    addr: &str,
    headers: &HeaderMap,
    proxy_addr: &str,
) -> Result<Bytes, NetError> {
    let io_err = |op: &'static str| move |e: io::Error| NetError::io(op, proxy_addr, e);

    let mut req = format!("CONNECT {addr} HTTP/1.1\r\nHost: {addr}\r\n").into_bytes();
    for (name, value) in headers {
        if name == HOST {
            continue;
        }
        req.extend_from_slice(canonical_name(name).as_bytes());
        req.extend_from_slice(b": ");
        req.extend_from_slice(value.as_bytes());
        req.extend_from_slice(b"\r\n");
    }
    req.extend_from_slice(b"\r\n");
    raw.write_all(&req).await.map_err(io_err("write"))?;
    raw.flush().await.map_err(io_err("write"))?;

    let mut buf = Vec::with_capacity(256);
    let mut chunk = [0u8; 1024];
    let head_len = loop {
        if let Some(end) = find_head_end(&buf) {
            break end;
        }
        if buf.len() > MAX_CONNECT_RESPONSE {
            return Err(NetError::TunnelConnectionFailed(
                "CONNECT response headers too large".to_string(),
            ));
        }
        let n = raw.read(&mut chunk).await.map_err(io_err("read"))?;
        if n == 0 {
            return Err(NetError::io(
                "read",
                proxy_addr,
                io::Error::new(io::ErrorKind::UnexpectedEof, "unexpected eof while tunneling"),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let (code, text) = parse_status_line(&buf[..head_len])?;
    if code != 200 {
        return Err(NetError::ProxyRejected { code, text });
    }
    Ok(Bytes::copy_from_slice(&buf[head_len..]))
}

/// Length of the response head including its blank line.
fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// Parses `HTTP/1.x CODE REASON` from the head of a response.
fn parse_status_line(head: &[u8]) -> Result<(u16, String), NetError> {
    let malformed = || {
        NetError::TunnelConnectionFailed(format!(
            "malformed CONNECT response: {:?}",
            String::from_utf8_lossy(&head[..head.len().min(64)])
        ))
    };
    let line_end = head
        .windows(2)
        .position(|w| w == b"\r\n")
        .ok_or_else(malformed)?;
    let line = std::str::from_utf8(&head[..line_end]).map_err(|_| malformed())?;

    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(malformed());
    }
    let code = parts
        .next()
        .and_then(|c| c.parse::<u16>().ok())
        .ok_or_else(malformed)?;
    let text = parts.next().unwrap_or_default().trim().to_string();
    Ok((code, text))
}

/// `proxy-authorization` -> `Proxy-Authorization`.
fn canonical_name(name: &HeaderName) -> String {
    name.as_str()
        .split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}
