//! Error classification into HTTP-like status codes.
//!
//! Walks the `source()` chain of an arbitrary error and reports the first
//! recognised cause. Classification never fails: unknown errors map to 500
//! and a missing error gets a dedicated report.

use crate::base::neterror::NetError;
use std::error::Error as StdError;
use std::io;

/// Flattened view of a failure, suitable for handing back to callers that
/// only understand status codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub status_code: u16,
    pub op: String,
    pub message: String,
    pub debug: String,
}

impl ErrorReport {
    fn new(status_code: u16, op: &str, err: &(dyn StdError + 'static)) -> Self {
        Self {
            status_code,
            op: op.to_string(),
            message: format!("request failed: {err}"),
            debug: format!("{err:?}"),
        }
    }

    /// Report produced when no error was supplied at all.
    pub fn missing() -> Self {
        Self {
            status_code: 500,
            op: "unknown".to_string(),
            message: "unknown error: no error was passed to classify".to_string(),
            debug: "no error provided".to_string(),
        }
    }
}

const TLS_MARKERS: &[&str] = &[
    "tls:",
    "x509:",
    "certificate verify",
    "certificate_verify_failed",
];

/// Classify `err` into an [`ErrorReport`].
pub fn classify(err: Option<&(dyn StdError + 'static)>) -> ErrorReport {
    let Some(err) = err else {
        return ErrorReport::missing();
    };

    let mut cause: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(current) = cause {
        if let Some(report) = classify_one(current) {
            return report;
        }
        cause = current.source();
    }

    let text = chain_text(err).to_ascii_lowercase();
    if TLS_MARKERS.iter().any(|m| text.contains(m)) {
        return ErrorReport::new(525, "tls_handshake", err);
    }

    ErrorReport::new(500, "unknown", err)
}

fn classify_one(err: &(dyn StdError + 'static)) -> Option<ErrorReport> {
    if let Some(net) = err.downcast_ref::<NetError>() {
        return classify_net_error(net);
    }
    if let Some(io_err) = err.downcast_ref::<io::Error>() {
        if io_err.raw_os_error().is_some() {
            return Some(classify_syscall(io_err, "unknown"));
        }
        return None;
    }
    if let Some(addr_err) = err.downcast_ref::<std::net::AddrParseError>() {
        return Some(ErrorReport::new(405, "unknown", addr_err));
    }
    if let Some(elapsed) = err.downcast_ref::<tokio::time::error::Elapsed>() {
        return Some(ErrorReport::new(408, "unknown", elapsed));
    }
    if let Some(url_err) = err.downcast_ref::<url::ParseError>() {
        return Some(ErrorReport::new(400, "unknown", url_err));
    }
    None
}

fn classify_net_error(err: &NetError) -> Option<ErrorReport> {
    let report = match err {
        NetError::ProxyRejected { code, .. } if *code != 0 => {
            ErrorReport::new(*code, "unknown", err)
        }
        NetError::Io { op, source, .. } => {
            let io_err: &io::Error = source;
            if io_err.raw_os_error().is_some() {
                classify_syscall(io_err, op)
            } else if io_err.kind() == io::ErrorKind::TimedOut {
                ErrorReport::new(408, op, err)
            } else if matches!(
                io_err.kind(),
                io::ErrorKind::AddrInUse | io::ErrorKind::AddrNotAvailable
            ) {
                ErrorReport::new(405, op, io_err)
            } else {
                ErrorReport::new(421, op, err)
            }
        }
        NetError::SslHandshakeFailed(_) | NetError::SslHandshakeRetryable(_) => {
            ErrorReport::new(525, "tls_handshake", err)
        }
        NetError::NameNotResolvedFor { .. } => ErrorReport::new(421, "lookup", err),
        NetError::AddressInvalid(_) => ErrorReport::new(405, "unknown", err),
        NetError::ConnectionTimedOut => ErrorReport::new(408, "unknown", err),
        NetError::InvalidUrl | NetError::UnknownUrlScheme(_) => {
            ErrorReport::new(400, "unknown", err)
        }
        _ => return None,
    };
    Some(report)
}

fn classify_syscall(err: &io::Error, op: &str) -> ErrorReport {
    if err.kind() == io::ErrorKind::TimedOut {
        ErrorReport::new(408, op, err)
    } else {
        ErrorReport::new(401, op, err)
    }
}

fn chain_text(err: &(dyn StdError + 'static)) -> String {
    let mut text = err.to_string();
    let mut cause = err.source();
    while let Some(current) = cause {
        text.push_str(": ");
        text.push_str(&current.to_string());
        cause = current.source();
    }
    text
}
