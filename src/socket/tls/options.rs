use crate::base::neterror::NetError;
use boring::ssl::{SslConnectorBuilder, SslOptions, SslVersion};

/// A TLS protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlsVersion(pub SslVersion);

impl TlsVersion {
    pub const TLS_1_0: TlsVersion = TlsVersion(SslVersion::TLS1);
    pub const TLS_1_1: TlsVersion = TlsVersion(SslVersion::TLS1_1);
    pub const TLS_1_2: TlsVersion = TlsVersion(SslVersion::TLS1_2);
    pub const TLS_1_3: TlsVersion = TlsVersion(SslVersion::TLS1_3);

    /// Maps a JA3 / wire version number (769..=772).
    pub fn from_wire(version: u16) -> Option<Self> {
        match version {
            769 => Some(Self::TLS_1_0),
            770 => Some(Self::TLS_1_1),
            771 => Some(Self::TLS_1_2),
            772 => Some(Self::TLS_1_3),
            _ => None,
        }
    }
}

/// Builder for [`HandshakeSpec`].
#[must_use]
#[derive(Debug, Clone)]
pub struct HandshakeSpecBuilder {
    spec: HandshakeSpec,
}

/// The ClientHello shape a transport presents.
///
/// Built once per client and applied to a single `SslConnector`; every
/// handshake made by that client shares it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeSpec {
    /// ALPN offer list, in preference order. Empty means no ALPN extension.
    pub alpn_protocols: Vec<String>,

    pub min_tls_version: Option<TlsVersion>,
    pub max_tls_version: Option<TlsVersion>,

    /// Offer session tickets.
    pub session_ticket: bool,

    /// Colon-separated cipher suites.
    pub cipher_list: Option<String>,

    /// Colon-separated groups.
    pub curves_list: Option<String>,

    /// Colon-separated signature algorithms.
    pub sigalgs_list: Option<String>,

    pub enable_ocsp_stapling: bool,
    pub enable_signed_cert_timestamps: bool,
    pub grease_enabled: bool,

    /// Randomize extension order per handshake (Chrome 110+).
    pub permute_extensions: bool,
}

impl Default for HandshakeSpec {
    fn default() -> Self {
        Self {
            alpn_protocols: vec!["h2".to_string(), "http/1.1".to_string()],
            min_tls_version: Some(TlsVersion::TLS_1_2),
            max_tls_version: Some(TlsVersion::TLS_1_3),
            session_ticket: true,
            cipher_list: None,
            curves_list: None,
            sigalgs_list: None,
            enable_ocsp_stapling: false,
            enable_signed_cert_timestamps: false,
            grease_enabled: false,
            permute_extensions: false,
        }
    }
}

impl HandshakeSpecBuilder {
    pub fn new() -> Self {
        Self {
            spec: HandshakeSpec::default(),
        }
    }

    pub fn alpn_protocols(mut self, alpn: &[&str]) -> Self {
        self.spec.alpn_protocols = alpn.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn min_tls_version(mut self, version: TlsVersion) -> Self {
        self.spec.min_tls_version = Some(version);
        self
    }

    pub fn max_tls_version(mut self, version: TlsVersion) -> Self {
        self.spec.max_tls_version = Some(version);
        self
    }

    pub fn session_ticket(mut self, enabled: bool) -> Self {
        self.spec.session_ticket = enabled;
        self
    }

    pub fn cipher_list(mut self, ciphers: &str) -> Self {
        self.spec.cipher_list = Some(ciphers.to_string());
        self
    }

    pub fn curves_list(mut self, curves: &str) -> Self {
        self.spec.curves_list = Some(curves.to_string());
        self
    }

    pub fn sigalgs_list(mut self, sigalgs: &str) -> Self {
        self.spec.sigalgs_list = Some(sigalgs.to_string());
        self
    }

    pub fn grease_enabled(mut self, enabled: bool) -> Self {
        self.spec.grease_enabled = enabled;
        self
    }

    pub fn enable_ocsp_stapling(mut self, enabled: bool) -> Self {
        self.spec.enable_ocsp_stapling = enabled;
        self
    }

    pub fn enable_signed_cert_timestamps(mut self, enabled: bool) -> Self {
        self.spec.enable_signed_cert_timestamps = enabled;
        self
    }

    pub fn permute_extensions(mut self, permute: bool) -> Self {
        self.spec.permute_extensions = permute;
        self
    }

    pub fn build(self) -> HandshakeSpec {
        self.spec
    }
}

impl Default for HandshakeSpecBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HandshakeSpec {
    pub fn builder() -> HandshakeSpecBuilder {
        HandshakeSpecBuilder::new()
    }

    /// Restricts the ALPN offer to HTTP/1.1 when any ALPN is offered.
    pub fn force_http1(mut self) -> Self {
        if !self.alpn_protocols.is_empty() {
            self.alpn_protocols = vec!["http/1.1".to_string()];
        }
        self
    }

    /// ALPN offer in wire format (length-prefixed).
    pub fn alpn_wire(&self) -> Result<Vec<u8>, NetError> {
        let mut wire = Vec::new();
        for proto in &self.alpn_protocols {
            if proto.is_empty() || proto.len() > 255 {
                return Err(NetError::InvalidSignature(format!(
                    "invalid ALPN protocol `{proto}`"
                )));
            }
            wire.push(proto.len() as u8);
            wire.extend_from_slice(proto.as_bytes());
        }
        Ok(wire)
    }

    /// Apply this configuration to an SSL connector builder.
    pub fn apply_to_builder(&self, builder: &mut SslConnectorBuilder) -> Result<(), NetError> {
        let ssl_err = |what: &'static str| {
            move |e: boring::error::ErrorStack| {
                tracing::debug!(setting = what, error = %e, "rejected TLS setting");
                NetError::SslProtocolError
            }
        };

        if let Some(min) = self.min_tls_version {
            builder
                .set_min_proto_version(Some(min.0))
                .map_err(ssl_err("min_version"))?;
        }
        if let Some(max) = self.max_tls_version {
            builder
                .set_max_proto_version(Some(max.0))
                .map_err(ssl_err("max_version"))?;
        }

        if let Some(ciphers) = &self.cipher_list {
            builder
                .set_cipher_list(ciphers)
                .map_err(ssl_err("cipher_list"))?;
        }

        if !self.alpn_protocols.is_empty() {
            builder
                .set_alpn_protos(&self.alpn_wire()?)
                .map_err(ssl_err("alpn"))?;
        }

        if let Some(sigalgs) = &self.sigalgs_list {
            builder
                .set_sigalgs_list(sigalgs)
                .map_err(ssl_err("sigalgs"))?;
        }

        if let Some(curves) = &self.curves_list {
            builder
                .set_curves_list(curves)
                .map_err(ssl_err("curves"))?;
        }

        builder.set_grease_enabled(self.grease_enabled);
        builder.set_permute_extensions(self.permute_extensions);

        if self.enable_ocsp_stapling {
            builder.enable_ocsp_stapling();
        }
        if self.enable_signed_cert_timestamps {
            builder.enable_signed_cert_timestamps();
        }
        if !self.session_ticket {
            builder.set_options(SslOptions::NO_TICKET);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alpn_wire_format() {
        let spec = HandshakeSpec::default();
        assert_eq!(spec.alpn_wire().unwrap(), b"\x02h2\x08http/1.1".to_vec());
    }

    #[test]
    fn test_force_http1_keeps_empty_alpn() {
        let spec = HandshakeSpec::default().force_http1();
        assert_eq!(spec.alpn_protocols, vec!["http/1.1".to_string()]);

        let bare = HandshakeSpec::builder().alpn_protocols(&[]).build().force_http1();
        assert!(bare.alpn_protocols.is_empty());
    }

    #[test]
    fn test_wire_versions() {
        assert_eq!(TlsVersion::from_wire(771), Some(TlsVersion::TLS_1_2));
        assert_eq!(TlsVersion::from_wire(772), Some(TlsVersion::TLS_1_3));
        assert_eq!(TlsVersion::from_wire(768), None);
    }
}
