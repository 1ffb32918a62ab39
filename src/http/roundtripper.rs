//! The transport manager: one fingerprinted TLS configuration, one cached
//! transport per address.
//!
//! Which transport an address gets is only known once ALPN has been
//! negotiated, so the first request to an address handshakes, inspects the
//! selected protocol and then installs the matching [`Transport`]. Concurrent
//! first requests may all handshake; [`AddressCache::reconcile`] lets exactly
//! one of them build the transport and settles the others.

use crate::base::neterror::NetError;
use crate::cookies::{cookie_header, CookieDescriptor};
use crate::http::cache::{AddressCache, Reconciled};
use crate::http::h2settings::{H2Settings, Navigator};
use crate::http::transport::{Body, Connector, DialTlsFn, TlsConnecting, Transport};
use crate::socket::dialer::{join_host_port, split_host_port, Dial};
use crate::socket::stream::BoxedSocket;
use crate::socket::tls::{self, HandshakeSpec};
use boring::ssl::SslConnector;
use http::header::{HeaderValue, COOKIE, USER_AGENT};
use http::{Request, Response, Uri};
use hyper::body::Incoming;
use std::sync::{Arc, Weak};
use tokio_boring::SslStream;

type TlsConn = SslStream<BoxedSocket>;

/// Result of the single-flight TLS routine.
pub enum Handshake {
    /// A handshaked connection for the caller to use.
    Ready(TlsConn),
    /// The caller built and cached the transport for the address; the
    /// connection it negotiated is waiting in the connection cache.
    Negotiated,
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Handshake::Ready(_) => f.write_str("Ready"),
            Handshake::Negotiated => f.write_str("Negotiated"),
        }
    }
}

/// Per-manager settings fixed at construction.
#[derive(Debug, Clone, Default)]
pub struct ManagerOptions {
    pub user_agent: String,
    pub force_http1: bool,
    pub insecure_skip_verify: bool,
    pub cookies: Vec<CookieDescriptor>,
}

struct Shared {
    connector: SslConnector,
    options: ManagerOptions,
    user_agent: HeaderValue,
    cookie_header: Option<HeaderValue>,
    h2_settings: H2Settings,
    dialer: Arc<dyn Dial>,
    cache: AddressCache<Transport, TlsConn>,
    weak: Weak<Shared>,
}

/// Sends requests over per-address transports negotiated with a custom
/// TLS ClientHello. Cheap to clone; clones share caches.
#[derive(Clone)]
pub struct TransportManager {
    shared: Arc<Shared>,
}

impl TransportManager {
    pub fn new(
        spec: &HandshakeSpec,
        options: ManagerOptions,
        dialer: Arc<dyn Dial>,
    ) -> Result<Self, NetError> {
        let connector = tls::build_connector(spec, options.insecure_skip_verify)?;
        let user_agent = HeaderValue::from_str(&options.user_agent)
            .map_err(|_| NetError::InvalidHeader("User-Agent".into()))?;
        let cookie_header = cookie_header(&options.cookies)
            .map(|v| HeaderValue::from_str(&v))
            .transpose()
            .map_err(|_| NetError::InvalidHeader("Cookie".into()))?;
        let h2_settings = Navigator::from_user_agent(&options.user_agent).h2_settings();

        let shared = Arc::new_cyclic(|weak| Shared {
            connector,
            options,
            user_agent,
            cookie_header,
            h2_settings,
            dialer,
            cache: AddressCache::new(),
            weak: weak.clone(),
        });
        Ok(Self { shared })
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.shared.options
    }

    pub async fn round_trip(&self, mut req: Request<Body>) -> Result<Response<Incoming>, NetError> {
        let shared = &self.shared;
        if let Some(cookies) = &shared.cookie_header {
            let value = match req.headers().get(COOKIE) {
                Some(existing) => {
                    let mut joined = existing.as_bytes().to_vec();
                    joined.extend_from_slice(b"; ");
                    joined.extend_from_slice(cookies.as_bytes());
                    HeaderValue::from_bytes(&joined)
                        .map_err(|_| NetError::InvalidHeader("Cookie".into()))?
                }
                None => cookies.clone(),
            };
            req.headers_mut().insert(COOKIE, value);
        }
        req.headers_mut()
            .insert(USER_AGENT, shared.user_agent.clone());

        let (addr, tls) = address_for(req.uri())?;
        let transport = match shared.cache.transport(&addr) {
            Some(t) => t,
            None => shared.negotiate(&addr, tls).await?,
        };
        transport.round_trip(req).await
    }

    /// Closes every cached connection and the connections held open by
    /// HTTP/2 transports. Transports stay cached.
    pub fn close_idle_connections(&self) {
        let drained = self.shared.cache.drain_connections();
        let transports = self.shared.cache.transports();
        for (_, transport) in &transports {
            transport.close_idle();
        }
        tracing::debug!(
            connections = drained.len(),
            transports = transports.len(),
            "closed idle connections"
        );
        drop(drained);
    }

    /// Runs the single-flight handshake for `addr`.
    pub async fn dial_tls(&self, addr: &str) -> Result<Handshake, NetError> {
        self.shared.dial_tls(addr).await
    }

    pub fn transport_count(&self) -> usize {
        self.shared.cache.transport_count()
    }

    pub fn connection_count(&self) -> usize {
        self.shared.cache.connection_count()
    }

    pub fn has_transport(&self, addr: &str) -> bool {
        self.shared.cache.has_transport(addr)
    }
}

impl std::fmt::Debug for TransportManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportManager")
            .field("options", &self.shared.options)
            .field("transports", &self.shared.cache.transport_count())
            .field("connections", &self.shared.cache.connection_count())
            .finish()
    }
}

impl Shared {
    async fn negotiate(&self, addr: &str, tls: bool) -> Result<Transport, NetError> {
        if !tls {
            let plain = Transport::http1(addr, Connector::Plain(self.dialer.clone()));
            return Ok(self.cache.insert_transport_if_absent(addr, plain));
        }

        if let Handshake::Ready(conn) = self.dial_tls(addr).await? {
            // The transport exists already; keep the connection for its next dial.
            if self.cache.stash(addr, conn).is_some() {
                tracing::debug!(addr = %addr, "dropping surplus connection");
            }
        }
        self.cache
            .transport(addr)
            .ok_or_else(|| NetError::NoTransport(addr.to_string()))
    }

    async fn dial_tls(&self, addr: &str) -> Result<Handshake, NetError> {
        if let Some(conn) = self.cache.take_connection(addr) {
            tracing::trace!(addr = %addr, "adopting cached connection");
            return Ok(Handshake::Ready(conn));
        }

        let (host, _) = split_host_port(addr)?;
        let socket = self.dialer.dial(addr).await?;
        let conn = tls::handshake(
            &self.connector,
            host,
            self.options.insecure_skip_verify,
            socket,
        )
        .await?;

        let alpn = tls::negotiated_protocol(&conn);
        let outcome = self.cache.reconcile(addr, conn, |_| self.build_transport(addr, &alpn));
        match outcome {
            Reconciled::Adopted { winner, loser } => {
                tracing::debug!(addr = %addr, "lost handshake race, closing connection");
                drop(loser);
                Ok(Handshake::Ready(winner))
            }
            Reconciled::Standby(conn) => Ok(Handshake::Ready(conn)),
            Reconciled::Built => {
                tracing::debug!(addr = %addr, alpn = %alpn, "transport negotiated");
                Ok(Handshake::Negotiated)
            }
        }
    }

    fn build_transport(&self, addr: &str, alpn: &str) -> Transport {
        if alpn == "h2" && !self.options.force_http1 {
            Transport::http2(
                addr,
                self.dial_tls_hook(),
                self.h2_settings,
                self.user_agent.clone(),
            )
        } else {
            Transport::http1(addr, Connector::Tls(self.dial_tls_hook()))
        }
    }

    fn dial_tls_hook(&self) -> DialTlsFn {
        let weak = self.weak.clone();
        Arc::new(move |addr: String| -> TlsConnecting {
            Box::pin(dial_for_transport(weak.clone(), addr))
        })
    }
}

// A transport holds only a weak handle, so dropping the manager frees the
// cycle between it and its transports.
async fn dial_for_transport(weak: Weak<Shared>, addr: String) -> Result<TlsConn, NetError> {
    let shared = weak
        .upgrade()
        .ok_or_else(|| NetError::NoTransport(addr.clone()))?;
    match shared.dial_tls(&addr).await? {
        Handshake::Ready(conn) => Ok(conn),
        Handshake::Negotiated => shared
            .cache
            .take_connection(&addr)
            .ok_or(NetError::NoTransport(addr)),
    }
}

/// Normalizes a request URI to `host:port` and whether it needs TLS.
pub fn address_for(uri: &Uri) -> Result<(String, bool), NetError> {
    let tls = match uri.scheme_str() {
        Some("https") => true,
        Some("http") => false,
        other => {
            return Err(NetError::UnknownUrlScheme(
                other.unwrap_or_default().to_string(),
            ))
        }
    };
    let host = uri
        .host()
        .filter(|h| !h.is_empty())
        .ok_or(NetError::InvalidUrl)?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let port = uri.port_u16().unwrap_or(if tls { 443 } else { 80 });
    Ok((join_host_port(host, port), tls))
}
