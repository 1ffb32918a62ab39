//! Fingerprint signature compilation.
//!
//! A signature is either a JA3 string
//! (`version,ciphers,extensions,curves,point_formats`), the name of a
//! built-in browser profile, or empty (profile chosen from the user agent).

use super::impersonate::{BrowserProfile, CHROME_SIGALGS};
use super::options::{HandshakeSpec, TlsVersion};
use crate::base::neterror::NetError;

/// Turns a signature into a [`HandshakeSpec`].
pub trait FingerprintCompiler: Send + Sync {
    fn compile(
        &self,
        signature: &str,
        user_agent: &str,
        force_http1: bool,
    ) -> Result<HandshakeSpec, NetError>;
}

/// The default [`FingerprintCompiler`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Ja3Compiler;

const EXT_SERVER_NAME: u16 = 0;
const EXT_STATUS_REQUEST: u16 = 5;
const EXT_ALPN: u16 = 16;
const EXT_SCT: u16 = 18;
const EXT_SESSION_TICKET: u16 = 35;
const EXT_SUPPORTED_VERSIONS: u16 = 43;

const SUPPORTED_EXTENSIONS: &[u16] = &[
    EXT_SERVER_NAME,
    EXT_STATUS_REQUEST,
    10, // supported_groups
    11, // ec_point_formats
    13, // signature_algorithms
    EXT_ALPN,
    EXT_SCT,
    21, // padding
    22, // encrypt_then_mac
    23, // extended_master_secret
    27, // compress_certificate
    28, // record_size_limit
    34, // delegated_credentials
    EXT_SESSION_TICKET,
    41, // pre_shared_key
    42, // early_data
    EXT_SUPPORTED_VERSIONS,
    44, // cookie
    45, // psk_key_exchange_modes
    49, // post_handshake_auth
    50, // signature_algorithms_cert
    51, // key_share
    17513, // application_settings
    17613, // application_settings (new codepoint)
    30032, // channel_id
    65037, // encrypted_client_hello
    65281, // renegotiation_info
];

impl Ja3Compiler {
    fn compile_ja3(&self, ja3: &str, force_http1: bool) -> Result<HandshakeSpec, NetError> {
        let fields: Vec<&str> = ja3.split(',').collect();
        if fields.len() != 5 {
            return Err(NetError::InvalidSignature(format!(
                "expected 5 comma-separated fields, got {}",
                fields.len()
            )));
        }

        let version = parse_u16(fields[0])?;
        let version = TlsVersion::from_wire(version).ok_or_else(|| {
            NetError::InvalidSignature(format!("unsupported TLS version {version}"))
        })?;

        let mut grease = false;

        let mut ciphers = Vec::new();
        for id in parse_list(fields[1])? {
            if is_grease(id) {
                grease = true;
            } else if let Some(name) = cipher_name(id) {
                ciphers.push(name);
            } else {
                tracing::trace!(cipher = id, "skipping cipher unknown to BoringSSL");
            }
        }
        if ciphers.is_empty() {
            return Err(NetError::InvalidSignature(
                "no supported cipher suites".to_string(),
            ));
        }

        let extensions = parse_list(fields[2])?;
        for &ext in &extensions {
            if is_grease(ext) {
                grease = true;
            } else if !SUPPORTED_EXTENSIONS.contains(&ext) {
                return Err(NetError::InvalidSignature(format!(
                    "extension {ext} is not supported"
                )));
            }
        }
        let has = |id: u16| extensions.contains(&id);

        let mut curves = Vec::new();
        for id in parse_list(fields[3])? {
            if is_grease(id) {
                grease = true;
            } else if let Some(name) = curve_name(id) {
                curves.push(name);
            } else {
                tracing::trace!(curve = id, "skipping curve unknown to BoringSSL");
            }
        }
        // Only uncompressed points are supported; validate the field anyway.
        parse_list(fields[4])?;

        let max_version = if has(EXT_SUPPORTED_VERSIONS) {
            TlsVersion::TLS_1_3
        } else {
            version
        };
        let min_version = if version == TlsVersion::TLS_1_3 {
            TlsVersion::TLS_1_2
        } else {
            version
        };

        let alpn: &[&str] = match (has(EXT_ALPN), force_http1) {
            (false, _) => &[],
            (true, true) => &["http/1.1"],
            (true, false) => &["h2", "http/1.1"],
        };

        let mut builder = HandshakeSpec::builder()
            .alpn_protocols(alpn)
            .min_tls_version(min_version)
            .max_tls_version(max_version)
            .cipher_list(&ciphers.join(":"))
            .session_ticket(has(EXT_SESSION_TICKET))
            .enable_ocsp_stapling(has(EXT_STATUS_REQUEST))
            .enable_signed_cert_timestamps(has(EXT_SCT))
            .grease_enabled(grease)
            .permute_extensions(false);
        if !curves.is_empty() {
            builder = builder.curves_list(&curves.join(":"));
        }
        if has(13) {
            builder = builder.sigalgs_list(CHROME_SIGALGS);
        }
        Ok(builder.build())
    }
}

impl FingerprintCompiler for Ja3Compiler {
    fn compile(
        &self,
        signature: &str,
        user_agent: &str,
        force_http1: bool,
    ) -> Result<HandshakeSpec, NetError> {
        let signature = signature.trim();
        if signature.is_empty() {
            let spec = BrowserProfile::from_user_agent(user_agent).handshake_spec();
            return Ok(if force_http1 { spec.force_http1() } else { spec });
        }
        if let Some(profile) = BrowserProfile::from_name(signature) {
            let spec = profile.handshake_spec();
            return Ok(if force_http1 { spec.force_http1() } else { spec });
        }
        self.compile_ja3(signature, force_http1)
    }
}

/// GREASE values (RFC 8701) look like 0x?a?a with equal bytes.
pub fn is_grease(id: u16) -> bool {
    (id & 0x0f0f) == 0x0a0a && (id >> 8) == (id & 0xff)
}

fn parse_u16(s: &str) -> Result<u16, NetError> {
    s.trim()
        .parse::<u16>()
        .map_err(|_| NetError::InvalidSignature(format!("`{s}` is not a valid id")))
}

fn parse_list(field: &str) -> Result<Vec<u16>, NetError> {
    if field.trim().is_empty() {
        return Ok(Vec::new());
    }
    field.split('-').map(parse_u16).collect()
}

fn cipher_name(id: u16) -> Option<&'static str> {
    let name = match id {
        0x1301 => "TLS_AES_128_GCM_SHA256",
        0x1302 => "TLS_AES_256_GCM_SHA384",
        0x1303 => "TLS_CHACHA20_POLY1305_SHA256",
        0xc02b => "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
        0xc02f => "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
        0xc02c => "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
        0xc030 => "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
        0xcca9 => "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256",
        0xcca8 => "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256",
        0xc009 => "TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA",
        0xc00a => "TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA",
        0xc013 => "TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA",
        0xc014 => "TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA",
        0xc023 => "TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA256",
        0xc027 => "TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA256",
        0x009c => "TLS_RSA_WITH_AES_128_GCM_SHA256",
        0x009d => "TLS_RSA_WITH_AES_256_GCM_SHA384",
        0x002f => "TLS_RSA_WITH_AES_128_CBC_SHA",
        0x0035 => "TLS_RSA_WITH_AES_256_CBC_SHA",
        0x000a => "TLS_RSA_WITH_3DES_EDE_CBC_SHA",
        _ => return None,
    };
    Some(name)
}

fn curve_name(id: u16) -> Option<&'static str> {
    match id {
        23 => Some("P-256"),
        24 => Some("P-384"),
        25 => Some("P-521"),
        29 => Some("X25519"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHROME_JA3: &str = "771,4865-4866-4867-49195-49199-49196-49200-52393-52392-49171-49172-156-157-47-53,0-23-65281-10-11-35-16-5-13-18-51-45-43-27-17513-21,29-23-24,0";

    #[test]
    fn test_grease_detection() {
        assert!(is_grease(0x0a0a));
        assert!(is_grease(0xfafa));
        assert!(!is_grease(0x0a1a));
        assert!(!is_grease(4865));
    }

    #[test]
    fn test_compile_chrome_ja3() {
        let spec = Ja3Compiler.compile(CHROME_JA3, "", false).unwrap();
        assert_eq!(spec.alpn_protocols, vec!["h2", "http/1.1"]);
        assert_eq!(spec.max_tls_version, Some(TlsVersion::TLS_1_3));
        assert_eq!(spec.curves_list.as_deref(), Some("X25519:P-256:P-384"));
        assert!(spec.session_ticket);
        assert!(spec.enable_ocsp_stapling);
        assert!(spec.enable_signed_cert_timestamps);
        assert!(spec
            .cipher_list
            .as_deref()
            .unwrap()
            .starts_with("TLS_AES_128_GCM_SHA256:TLS_AES_256_GCM_SHA384"));
    }

    #[test]
    fn test_force_http1_and_no_tickets() {
        let ja3 = "771,4865-49195,0-10-11-16,29,0";
        let spec = Ja3Compiler.compile(ja3, "", true).unwrap();
        assert_eq!(spec.alpn_protocols, vec!["http/1.1"]);
        assert!(!spec.session_ticket);
        assert_eq!(spec.max_tls_version, Some(TlsVersion::TLS_1_2));
    }

    #[test]
    fn test_missing_alpn_extension() {
        let spec = Ja3Compiler.compile("771,49195,0-10,23,0", "", false).unwrap();
        assert!(spec.alpn_protocols.is_empty());
    }

    #[test]
    fn test_grease_values_enable_grease() {
        let ja3 = "771,2570-4865,2570-0-16-43,2570-29,0";
        let spec = Ja3Compiler.compile(ja3, "", false).unwrap();
        assert!(spec.grease_enabled);
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let err = Ja3Compiler.compile("771,4865,0-9999,29,0", "", false).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid fingerprint signature: extension 9999 is not supported"
        );
    }

    #[test]
    fn test_malformed_signatures() {
        assert!(Ja3Compiler.compile("771,4865", "", false).is_err());
        assert!(Ja3Compiler.compile("999,4865,0,29,0", "", false).is_err());
        assert!(Ja3Compiler.compile("771,abc,0,29,0", "", false).is_err());
        assert!(Ja3Compiler.compile("771,1,0,29,0", "", false).is_err());
    }

    #[test]
    fn test_named_and_empty_signatures() {
        let safari_ua = "Mozilla/5.0 (Macintosh) AppleWebKit/605.1.15 Version/17.4 Safari/605.1.15";
        let spec = Ja3Compiler.compile("", safari_ua, false).unwrap();
        assert_eq!(spec, BrowserProfile::Safari.handshake_spec());

        let spec = Ja3Compiler.compile("firefox", "", true).unwrap();
        assert_eq!(spec.alpn_protocols, vec!["http/1.1"]);
    }
}
