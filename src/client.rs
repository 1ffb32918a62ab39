//! HTTP client with builder pattern.
//!
//! Collects the construction inputs (proxy, user agent, fingerprint
//! signature and the connection flags) and wires a [`TransportManager`] over
//! either a direct dialer or a [`TunnelDialer`].
//!
//! # Example
//!
//! ```rust,ignore
//! use ja3net::Client;
//!
//! let client = Client::builder()
//!     .proxy("http://user:pw@proxy.test:8080")
//!     .user_agent("Mozilla/5.0 ... Chrome/120.0.0.0 Safari/537.36")
//!     .signature("chrome")
//!     .build()?;
//!
//! let resp = client.get("https://example.com").send().await?;
//! ```

use crate::base::neterror::NetError;
use crate::cookies::CookieDescriptor;
use crate::http::roundtripper::{ManagerOptions, TransportManager};
use crate::http::transport::Body;
use crate::socket::dialer::{Dial, DirectDialer};
use crate::socket::tls::{FingerprintCompiler, Ja3Compiler};
use crate::socket::tunnel::TunnelDialer;
use bytes::Bytes;
use http::{HeaderMap, Method, Request, Response};
use hyper::body::Incoming;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// User agent used when none is configured.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// HTTP client presenting a configurable TLS fingerprint.
///
/// Use [`Client::builder()`] to configure and create a client. Clones share
/// transports and connections.
#[derive(Clone, Debug)]
pub struct Client {
    manager: TransportManager,
    tunnel: Option<TunnelDialer>,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Sends `req` and returns the response head with a streaming body.
    pub async fn execute(&self, req: Request<Body>) -> Result<Response<Incoming>, NetError> {
        self.manager.round_trip(req).await
    }

    pub fn close_idle_connections(&self) {
        self.manager.close_idle_connections();
    }

    pub fn transport_manager(&self) -> &TransportManager {
        &self.manager
    }

    /// The proxy dialer, if a proxy is configured.
    pub fn tunnel(&self) -> Option<&TunnelDialer> {
        self.tunnel.as_ref()
    }

    /// Start building a GET request.
    pub fn get<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    /// Start building a POST request.
    pub fn post<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    /// Start building a request with custom method.
    pub fn request<U: AsRef<str>>(&self, method: Method, url: U) -> RequestBuilder {
        RequestBuilder {
            client: self.clone(),
            method,
            url: url.as_ref().to_string(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

/// Serializable client configuration.
///
/// ```json
/// { "proxy": "socks5h://127.0.0.1:9050", "signature": "firefox",
///   "userAgent": "...", "forceHttp1": false, "connectTimeoutMs": 10000 }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BrowserConfig {
    pub proxy: Option<String>,
    pub user_agent: Option<String>,
    pub signature: String,
    pub force_http1: bool,
    pub insecure_skip_verify: bool,
    pub cookies: Vec<CookieDescriptor>,
    pub disable_h2_tunnel_reuse: bool,
    pub connect_timeout_ms: Option<u64>,
}

impl BrowserConfig {
    pub fn from_json(json: &str) -> Result<Self, NetError> {
        serde_json::from_str(json).map_err(|e| NetError::InvalidConfig(e.to_string()))
    }
}

/// Builder for creating a [`Client`].
pub struct ClientBuilder {
    proxy: Option<String>,
    user_agent: String,
    signature: String,
    force_http1: bool,
    insecure_skip_verify: bool,
    cookies: Vec<CookieDescriptor>,
    h2_tunnel_reuse: bool,
    connect_timeout: Option<Duration>,
    compiler: Arc<dyn FingerprintCompiler>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            proxy: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            signature: String::new(),
            force_http1: false,
            insecure_skip_verify: false,
            cookies: Vec::new(),
            h2_tunnel_reuse: true,
            connect_timeout: None,
            compiler: Arc::new(Ja3Compiler),
        }
    }
}

impl ClientBuilder {
    pub fn from_config(config: BrowserConfig) -> Self {
        let mut builder = Self::default()
            .signature(config.signature)
            .force_http1(config.force_http1)
            .insecure_skip_verify(config.insecure_skip_verify)
            .cookies(config.cookies)
            .h2_tunnel_reuse(!config.disable_h2_tunnel_reuse);
        if let Some(proxy) = config.proxy {
            builder = builder.proxy(proxy);
        }
        if let Some(ua) = config.user_agent {
            builder = builder.user_agent(ua);
        }
        if let Some(ms) = config.connect_timeout_ms {
            builder = builder.connect_timeout(Duration::from_millis(ms));
        }
        builder
    }

    /// Route every connection through `proxy_url`.
    pub fn proxy(mut self, proxy_url: impl Into<String>) -> Self {
        self.proxy = Some(proxy_url.into());
        self
    }

    /// Sent on every request and CONNECT; also picks the HTTP/2 settings.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// JA3 string or profile name; empty picks a profile from the user agent.
    pub fn signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = signature.into();
        self
    }

    pub fn force_http1(mut self, enabled: bool) -> Self {
        self.force_http1 = enabled;
        self
    }

    pub fn insecure_skip_verify(mut self, enabled: bool) -> Self {
        self.insecure_skip_verify = enabled;
        self
    }

    pub fn cookies(mut self, cookies: Vec<CookieDescriptor>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn cookie(mut self, cookie: CookieDescriptor) -> Self {
        self.cookies.push(cookie);
        self
    }

    pub fn h2_tunnel_reuse(mut self, enabled: bool) -> Self {
        self.h2_tunnel_reuse = enabled;
        self
    }

    /// Timeout for each TCP connect.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn compiler(mut self, compiler: Arc<dyn FingerprintCompiler>) -> Self {
        self.compiler = compiler;
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<Client, NetError> {
        let spec = self
            .compiler
            .compile(&self.signature, &self.user_agent, self.force_http1)?;

        let direct = Arc::new(DirectDialer::new().with_connect_timeout(self.connect_timeout));
        let tunnel = match &self.proxy {
            Some(url) => Some(
                TunnelDialer::new(url, &self.user_agent)?
                    .with_dialer(direct.clone())
                    .with_h2_reuse(self.h2_tunnel_reuse),
            ),
            None => None,
        };
        let dialer: Arc<dyn Dial> = match &tunnel {
            Some(t) => Arc::new(t.clone()),
            None => direct,
        };

        let options = ManagerOptions {
            user_agent: self.user_agent,
            force_http1: self.force_http1,
            insecure_skip_verify: self.insecure_skip_verify,
            cookies: self.cookies,
        };
        let manager = TransportManager::new(&spec, options, dialer)?;
        tracing::debug!(
            proxy = tunnel.as_ref().map(|t| t.proxy().address()).unwrap_or_default(),
            "client built"
        );
        Ok(Client { manager, tunnel })
    }
}

/// Builder for a single request.
pub struct RequestBuilder {
    client: Client,
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Bytes,
}

impl RequestBuilder {
    /// Add a header.
    pub fn header<K, V>(mut self, key: K, value: V) -> Self
    where
        K: http::header::IntoHeaderName,
        V: TryInto<http::HeaderValue>,
    {
        if let Ok(val) = value.try_into() {
            self.headers.insert(key, val);
        }
        self
    }

    /// Set request body.
    pub fn body<B: Into<Bytes>>(mut self, body: B) -> Self {
        self.body = body.into();
        self
    }

    /// Send the request.
    pub async fn send(self) -> Result<Response<Incoming>, NetError> {
        let url = Url::parse(&self.url).map_err(|_| NetError::InvalidUrl)?;
        let mut req = Request::builder()
            .method(self.method)
            .uri(url.as_str())
            .body(Body::new(self.body))
            .map_err(|_| NetError::InvalidUrl)?;
        req.headers_mut().extend(self.headers);
        self.client.execute(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_json() {
        let config = BrowserConfig::from_json(
            r#"{
                "proxy": "socks5h://127.0.0.1:9050",
                "signature": "firefox",
                "disableH2TunnelReuse": true,
                "connectTimeoutMs": 2500,
                "cookies": [{"name": "a", "value": "b"}]
            }"#,
        )
        .unwrap();
        assert_eq!(config.proxy.as_deref(), Some("socks5h://127.0.0.1:9050"));
        assert!(config.disable_h2_tunnel_reuse);

        let builder = ClientBuilder::from_config(config);
        assert!(!builder.h2_tunnel_reuse);
        assert_eq!(builder.connect_timeout, Some(Duration::from_millis(2500)));
        assert_eq!(builder.cookies.len(), 1);
        assert_eq!(builder.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn test_config_from_malformed_json() {
        let err = BrowserConfig::from_json(r#"{"forceHttp1": "yes"}"#).unwrap_err();
        assert!(matches!(err, NetError::InvalidConfig(_)));
        assert!(err.is_configuration());

        let err = BrowserConfig::from_json("{").unwrap_err();
        assert!(matches!(err, NetError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_build_with_proxy() {
        let client = Client::builder()
            .proxy("http://user:pw@proxy.test:8080")
            .build()
            .unwrap();
        let tunnel = client.tunnel().unwrap();
        assert_eq!(tunnel.proxy().address(), "proxy.test:8080");
        assert_eq!(client.transport_manager().transport_count(), 0);
    }

    #[test]
    fn test_build_rejects_bad_proxy() {
        let err = Client::builder().proxy("ftp://proxy.test").build().unwrap_err();
        assert!(matches!(err, NetError::UnsupportedProxyScheme(_)));
    }

    #[test]
    fn test_build_rejects_bad_signature() {
        let err = Client::builder().signature("771,,,,").build().unwrap_err();
        assert!(matches!(err, NetError::InvalidSignature(_)));
    }

    #[tokio::test]
    async fn test_send_rejects_bad_url() {
        let client = Client::builder().build().unwrap();
        let err = client.get("not a url").send().await.unwrap_err();
        assert!(matches!(err, NetError::InvalidUrl));
    }
}
