use std::io;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum NetError {
    // Configuration Errors
    #[error("invalid proxy url `{url}`: {reason}")]
    InvalidProxyUrl { url: String, reason: String },
    #[error("proxy scheme missing, specify it explicitly (e.g. https://)")]
    MissingProxyScheme,
    #[error("proxy scheme `{0}` is not supported")]
    UnsupportedProxyScheme(String),
    #[error("invalid fingerprint signature: {0}")]
    InvalidSignature(String),
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),

    // Connection Errors
    #[error("{op} {addr}: {source}")]
    Io {
        op: &'static str,
        addr: String,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("name not resolved: {domain}")]
    NameNotResolvedFor {
        domain: String,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("address invalid: {0}")]
    AddressInvalid(String),
    #[error("connection timed out")]
    ConnectionTimedOut,
    #[error("SOCKS connection failed: {0}")]
    SocksConnectionFailed(String),

    // TLS Errors
    #[error("SSL protocol error")]
    SslProtocolError,
    #[error("TLS handshake error: {0}")]
    SslHandshakeFailed(String),
    #[error("TLS 1.3 handshake error (please retry request): {0}")]
    SslHandshakeRetryable(String),

    // Proxy Errors
    #[error("proxy responded with non 200 code: {code} {text}")]
    ProxyRejected { code: u16, text: String },
    #[error("tunnel connection failed: {0}")]
    TunnelConnectionFailed(String),
    #[error("negotiated unsupported application layer protocol: {0}")]
    AlpnNegotiationFailed(String),

    // HTTP Errors
    #[error("HTTP/1.1 or HTTP/2 exchange failed: {0}")]
    Http(#[source] Arc<hyper::Error>),
    #[error("HTTP/2 tunnel error: {0}")]
    Http2(#[source] Arc<http2::Error>),
    #[error("Invalid URL")]
    InvalidUrl,
    #[error("invalid URL scheme: [{0}]")]
    UnknownUrlScheme(String),
    #[error("no transport negotiated for {0}")]
    NoTransport(String),
}

impl NetError {
    /// Wraps an I/O failure of operation `op` against `addr`.
    pub fn io(op: &'static str, addr: impl Into<String>, source: io::Error) -> Self {
        NetError::Io {
            op,
            addr: addr.into(),
            source: Arc::new(source),
        }
    }

    /// True for errors raised while validating construction inputs.
    /// These are never worth retrying.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            NetError::InvalidProxyUrl { .. }
                | NetError::MissingProxyScheme
                | NetError::UnsupportedProxyScheme(_)
                | NetError::InvalidSignature(_)
                | NetError::InvalidHeader(_)
                | NetError::InvalidConfig(_)
        )
    }

    /// Chromium `net_error_list.h` code for this error.
    pub fn as_i32(&self) -> i32 {
        match self {
            NetError::Io { source, .. } => match source.kind() {
                io::ErrorKind::ConnectionRefused => -102,
                io::ErrorKind::ConnectionReset => -101,
                io::ErrorKind::ConnectionAborted => -103,
                io::ErrorKind::TimedOut => -118,
                io::ErrorKind::UnexpectedEof => -100,
                _ => -104,
            },
            NetError::NameNotResolvedFor { .. } => -105,
            NetError::SslProtocolError => -107,
            NetError::AddressInvalid(_) => -108,
            NetError::TunnelConnectionFailed(_) => -111,
            NetError::ConnectionTimedOut => -118,
            NetError::SocksConnectionFailed(_) => -120,
            NetError::AlpnNegotiationFailed(_) => -122,
            NetError::ProxyRejected { code: 407, .. } => -127,
            NetError::ProxyRejected { .. } => -111,
            NetError::SslHandshakeFailed(_) | NetError::SslHandshakeRetryable(_) => -107,
            NetError::InvalidProxyUrl { .. }
            | NetError::MissingProxyScheme
            | NetError::UnsupportedProxyScheme(_) => -131,
            NetError::InvalidUrl => -300,
            NetError::UnknownUrlScheme(_) => -302,
            NetError::Http(_) => -320,
            NetError::Http2(_) => -337,
            NetError::InvalidHeader(_) => -370,
            NetError::InvalidConfig(_) => -4,
            NetError::InvalidSignature(_) => -342,
            NetError::NoTransport(_) => -336,
        }
    }
}

impl From<hyper::Error> for NetError {
    fn from(e: hyper::Error) -> Self {
        NetError::Http(Arc::new(e))
    }
}

impl From<http2::Error> for NetError {
    fn from(e: http2::Error) -> Self {
        NetError::Http2(Arc::new(e))
    }
}
