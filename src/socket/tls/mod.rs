//! TLS handshakes with a configurable ClientHello.
//!
//! A [`HandshakeSpec`] is applied once to an `SslConnector`; [`handshake`]
//! then layers TLS over any [`StreamSocket`], which is how TLS runs over
//! CONNECT tunnels and SOCKS connections as easily as over TCP.

use crate::base::neterror::NetError;
use crate::socket::stream::StreamSocket;
use boring::ssl::{SslConnector, SslMethod, SslVerifyMode};
use tokio_boring::SslStream;

pub mod impersonate;
pub mod ja3;
pub mod options;

pub use self::impersonate::BrowserProfile;
pub use self::ja3::{FingerprintCompiler, Ja3Compiler};
pub use self::options::{HandshakeSpec, HandshakeSpecBuilder, TlsVersion};

/// Builds the connector shared by every handshake of one client.
pub fn build_connector(spec: &HandshakeSpec, skip_verify: bool) -> Result<SslConnector, NetError> {
    let mut builder = SslConnector::builder(SslMethod::tls()).map_err(|e| {
        tracing::error!(error = %e, "failed to create SSL connector");
        NetError::SslProtocolError
    })?;
    spec.apply_to_builder(&mut builder)?;
    builder.set_verify(if skip_verify {
        SslVerifyMode::NONE
    } else {
        SslVerifyMode::PEER
    });
    Ok(builder.build())
}

/// Connector for TLS sessions to an `https` proxy: offers `h2` and
/// `http/1.1` and does not verify the proxy certificate.
pub fn proxy_connector() -> Result<SslConnector, NetError> {
    let spec = HandshakeSpec::default();
    build_connector(&spec, true)
}

/// Performs a client handshake with `host` over `stream`.
///
/// SNI is omitted for IP literals. A failure caused by TLS 1.3 group
/// negotiation is reported as retryable; nothing is retried here.
pub async fn handshake<S: StreamSocket>(
    connector: &SslConnector,
    host: &str,
    skip_verify: bool,
    stream: S,
) -> Result<SslStream<S>, NetError> {
    let mut config = connector.configure().map_err(|e| {
        tracing::error!(error = %e, "failed to configure SSL session");
        NetError::SslProtocolError
    })?;

    if skip_verify {
        config.set_verify_hostname(false);
        config.set_verify(SslVerifyMode::NONE);
    }
    if !should_set_sni(host) {
        config.set_use_server_name_indication(false);
        config.set_verify_hostname(false);
    }

    match tokio_boring::connect(config, host, stream).await {
        Ok(tls) => {
            tracing::debug!(
                host = %host,
                alpn = %negotiated_protocol(&tls),
                "TLS handshake complete"
            );
            Ok(tls)
        }
        Err(e) => {
            let msg = e.to_string();
            tracing::debug!(host = %host, error = %msg, "TLS handshake failed");
            if msg.to_ascii_lowercase().contains("curve") {
                Err(NetError::SslHandshakeRetryable(msg))
            } else {
                Err(NetError::SslHandshakeFailed(msg))
            }
        }
    }
}

/// The ALPN protocol selected by the server, empty when none was.
pub fn negotiated_protocol<S>(stream: &SslStream<S>) -> String {
    stream
        .ssl()
        .selected_alpn_protocol()
        .map(|p| String::from_utf8_lossy(p).into_owned())
        .unwrap_or_default()
}

/// Per RFC 6066, SNI MUST NOT be set for raw IP addresses.
pub fn should_set_sni(host: &str) -> bool {
    host.parse::<std::net::IpAddr>().is_err()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_set_sni() {
        assert!(should_set_sni("example.com"));
        assert!(!should_set_sni("127.0.0.1"));
        assert!(!should_set_sni("::1"));
    }

    #[test]
    fn test_build_connector_for_profiles() {
        for profile in [
            BrowserProfile::Chrome,
            BrowserProfile::Firefox,
            BrowserProfile::Safari,
            BrowserProfile::OkHttp,
        ] {
            build_connector(&profile.handshake_spec(), false).unwrap();
        }
        proxy_connector().unwrap();
    }
}
