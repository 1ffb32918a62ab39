//! HTTP/1.x- and HTTP/2-shaped transports bound to one address.
//!
//! A transport does not own a TLS configuration. It asks its [`Connector`]
//! for a ready stream whenever it needs a connection, so handshakes stay
//! under the control of whoever built the transport.

use crate::base::neterror::NetError;
use crate::http::h2settings::H2Settings;
use crate::socket::dialer::Dial;
use crate::socket::stream::BoxedSocket;
use bytes::Bytes;
use http::header::{HeaderValue, CONNECTION, HOST, USER_AGENT};
use http::uri::PathAndQuery;
use http::{Request, Response, Uri};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::client::conn::{http1, http2};
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::AbortHandle;
use tokio_boring::SslStream;

/// Request body type accepted by every transport.
pub type Body = Full<Bytes>;

/// Alias for the `Future` returned by a TLS dial hook.
pub type TlsConnecting =
    Pin<Box<dyn Future<Output = Result<SslStream<BoxedSocket>, NetError>> + Send>>;

/// Produces a handshaked TLS stream to an address.
pub type DialTlsFn = Arc<dyn Fn(String) -> TlsConnecting + Send + Sync>;

/// Where a transport gets its streams from.
#[derive(Clone)]
pub enum Connector {
    /// Plain streams from a dialer (scheme `http`).
    Plain(Arc<dyn Dial>),
    /// Handshaked TLS streams (scheme `https`).
    Tls(DialTlsFn),
}

impl Connector {
    async fn connect(&self, addr: &str) -> Result<BoxedSocket, NetError> {
        match self {
            Connector::Plain(dialer) => dialer.dial(addr).await,
            Connector::Tls(dial_tls) => dial_tls(addr.to_string()).await.map(BoxedSocket::new),
        }
    }
}

/// A negotiated transport for one address.
#[derive(Clone)]
pub enum Transport {
    Http1(Arc<Http1Transport>),
    Http2(Arc<Http2Transport>),
}

impl Transport {
    pub fn http1(addr: &str, connector: Connector) -> Self {
        Transport::Http1(Arc::new(Http1Transport {
            addr: addr.to_string(),
            connector,
        }))
    }

    pub fn http2(
        addr: &str,
        dial_tls: DialTlsFn,
        settings: H2Settings,
        user_agent: HeaderValue,
    ) -> Self {
        Transport::Http2(Arc::new(Http2Transport {
            addr: addr.to_string(),
            dial_tls,
            settings,
            user_agent,
            conn: Mutex::new(None),
        }))
    }

    pub async fn round_trip(&self, req: Request<Body>) -> Result<Response<Incoming>, NetError> {
        match self {
            Transport::Http1(t) => t.round_trip(req).await,
            Transport::Http2(t) => t.round_trip(req).await,
        }
    }

    /// Drops idle connections held by the transport itself.
    pub fn close_idle(&self) {
        if let Transport::Http2(t) = self {
            t.close_idle();
        }
    }

    pub fn is_http2(&self) -> bool {
        matches!(self, Transport::Http2(_))
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Http1(t) => f.debug_tuple("Http1").field(&t.addr).finish(),
            Transport::Http2(t) => f.debug_tuple("Http2").field(&t.addr).finish(),
        }
    }
}

/// HTTP/1.x with keep-alive disabled: one connection per request.
pub struct Http1Transport {
    addr: String,
    connector: Connector,
}

impl Http1Transport {
    async fn round_trip(&self, mut req: Request<Body>) -> Result<Response<Incoming>, NetError> {
        let io = self.connector.connect(&self.addr).await?;
        let (mut sender, conn) = http1::handshake(TokioIo::new(io)).await?;

        let addr = self.addr.clone();
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(addr = %addr, error = %e, "HTTP/1.1 connection error");
            }
        });

        prepare_http1(&mut req)?;
        Ok(sender.send_request(req).await?)
    }
}

fn prepare_http1(req: &mut Request<Body>) -> Result<(), NetError> {
    if !req.headers().contains_key(HOST) {
        let host = req
            .uri()
            .authority()
            .ok_or(NetError::InvalidUrl)?
            .as_str()
            .to_string();
        let value = HeaderValue::from_str(&host).map_err(|_| NetError::InvalidUrl)?;
        req.headers_mut().insert(HOST, value);
    }
    req.headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("close"));

    let path = req
        .uri()
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));
    *req.uri_mut() = Uri::from(path);
    Ok(())
}

struct H2Conn {
    sender: http2::SendRequest<Body>,
    driver: AbortHandle,
}

/// HTTP/2 over one multiplexed connection, re-dialed when it closes.
pub struct Http2Transport {
    addr: String,
    dial_tls: DialTlsFn,
    settings: H2Settings,
    user_agent: HeaderValue,
    conn: Mutex<Option<H2Conn>>,
}

impl Http2Transport {
    async fn round_trip(&self, mut req: Request<Body>) -> Result<Response<Incoming>, NetError> {
        let mut sender = self.sender().await?;
        if !req.headers().contains_key(USER_AGENT) {
            req.headers_mut()
                .insert(USER_AGENT, self.user_agent.clone());
        }
        sender.ready().await?;
        Ok(sender.send_request(req).await?)
    }

    fn live_sender(&self) -> Option<http2::SendRequest<Body>> {
        let guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .as_ref()
            .filter(|c| !c.sender.is_closed())
            .map(|c| c.sender.clone())
    }

    async fn sender(&self) -> Result<http2::SendRequest<Body>, NetError> {
        if let Some(sender) = self.live_sender() {
            return Ok(sender);
        }

        let io = (self.dial_tls)(self.addr.clone()).await?;
        let mut builder = http2::Builder::new(TokioExecutor::new());
        self.settings.apply_to_transport(&mut builder);
        let (sender, conn) = builder.handshake(TokioIo::new(io)).await?;

        let addr = self.addr.clone();
        let driver = tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(addr = %addr, error = %e, "HTTP/2 connection error");
            }
        })
        .abort_handle();

        let mut guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = guard.as_ref().filter(|c| !c.sender.is_closed()) {
            // Another request installed a connection first.
            driver.abort();
            return Ok(existing.sender.clone());
        }
        if let Some(stale) = guard.take() {
            stale.driver.abort();
        }
        *guard = Some(H2Conn {
            sender: sender.clone(),
            driver,
        });
        tracing::debug!(addr = %self.addr, "HTTP/2 connection established");
        Ok(sender)
    }

    fn close_idle(&self) {
        let conn = self
            .conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(conn) = conn {
            conn.driver.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_http1_origin_form() {
        let mut req = Request::get("https://example.com:8443/a/b?q=1")
            .body(Body::default())
            .unwrap();
        prepare_http1(&mut req).unwrap();
        assert_eq!(req.uri().to_string(), "/a/b?q=1");
        assert_eq!(req.headers()[HOST], "example.com:8443");
        assert_eq!(req.headers()[CONNECTION], "close");
    }

    #[test]
    fn test_prepare_http1_keeps_host_override() {
        let mut req = Request::get("http://10.0.0.1/")
            .header(HOST, "virtual.test")
            .body(Body::default())
            .unwrap();
        prepare_http1(&mut req).unwrap();
        assert_eq!(req.headers()[HOST], "virtual.test");
    }
}
