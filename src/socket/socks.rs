//! SOCKS4 and SOCKS5 client handshakes.
//!
//! The proxy connection itself comes from an injected [`Dial`]; this module
//! only speaks the wire protocol (RFC 1928, RFC 1929 and SOCKS4).

use crate::base::neterror::NetError;
use crate::socket::dialer::{split_host_port, Dial, Dialing};
use crate::socket::proxy::{ProxyEndpoint, ProxyType};
use crate::socket::stream::BoxedSocket;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const SOCKS5_VERSION: u8 = 0x05;
const SOCKS4_VERSION: u8 = 0x04;
const CMD_CONNECT: u8 = 0x01;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_USER_PASS: u8 = 0x02;
const METHOD_NONE_ACCEPTABLE: u8 = 0xff;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;
const SOCKS4_GRANTED: u8 = 0x5a;

/// Dials targets through a SOCKS proxy.
#[derive(Clone)]
pub struct SocksDialer {
    proxy: ProxyEndpoint,
    dialer: Arc<dyn Dial>,
}

impl SocksDialer {
    pub fn new(proxy: ProxyEndpoint, dialer: Arc<dyn Dial>) -> Self {
        Self { proxy, dialer }
    }

    /// Connects to the proxy and asks it to open `addr`.
    pub async fn connect(&self, addr: &str) -> Result<BoxedSocket, NetError> {
        let proxy_addr = self.proxy.address();
        let mut stream = self.dialer.dial(&proxy_addr).await?;

        let result = match self.proxy.proxy_type() {
            ProxyType::Socks4 => self.socks4_handshake(&mut stream, addr).await,
            ProxyType::Socks5 => self.socks5_handshake(&mut stream, addr, false).await,
            ProxyType::Socks5h => self.socks5_handshake(&mut stream, addr, true).await,
            other => Err(NetError::UnsupportedProxyScheme(format!("{other:?}"))),
        };

        match result {
            Ok(()) => {
                tracing::debug!(proxy = %proxy_addr, target = %addr, kind = ?self.proxy.proxy_type(), "SOCKS tunnel established");
                Ok(stream)
            }
            Err(e) => {
                tracing::debug!(proxy = %proxy_addr, target = %addr, error = %e, "SOCKS handshake failed");
                let _ = stream.shutdown().await;
                Err(e)
            }
        }
    }

    async fn socks5_handshake(
        &self,
        s: &mut BoxedSocket,
        addr: &str,
        remote_dns: bool,
    ) -> Result<(), NetError> {
        let proxy_addr = self.proxy.address();
        let io_err = |e: io::Error| NetError::io("socks", proxy_addr.clone(), e);
        let creds = self.proxy.credentials();

        if creds.is_some() {
            s.write_all(&[SOCKS5_VERSION, 0x02, METHOD_NO_AUTH, METHOD_USER_PASS])
                .await
                .map_err(io_err)?;
        } else {
            s.write_all(&[SOCKS5_VERSION, 0x01, METHOD_NO_AUTH])
                .await
                .map_err(io_err)?;
        }

        let mut rep = [0u8; 2];
        s.read_exact(&mut rep).await.map_err(io_err)?;
        if rep[0] != SOCKS5_VERSION {
            return Err(socks_err(format!("unexpected SOCKS version {}", rep[0])));
        }
        match rep[1] {
            METHOD_NO_AUTH => {}
            METHOD_USER_PASS => {
                let (user, pass) = creds.ok_or_else(|| {
                    socks_err("proxy requires authentication but no credentials were given")
                })?;
                let (u, p) = (user.as_bytes(), pass.as_bytes());
                if u.len() > 255 || p.len() > 255 {
                    return Err(socks_err("SOCKS credentials too long"));
                }
                let mut buf = Vec::with_capacity(3 + u.len() + p.len());
                buf.push(0x01);
                buf.push(u.len() as u8);
                buf.extend_from_slice(u);
                buf.push(p.len() as u8);
                buf.extend_from_slice(p);
                s.write_all(&buf).await.map_err(io_err)?;

                let mut r2 = [0u8; 2];
                s.read_exact(&mut r2).await.map_err(io_err)?;
                if r2[1] != 0x00 {
                    return Err(socks_err("SOCKS authentication failed"));
                }
            }
            METHOD_NONE_ACCEPTABLE => {
                return Err(socks_err("no acceptable SOCKS authentication method"))
            }
            other => return Err(socks_err(format!("unsupported SOCKS method {other}"))),
        }

        let (host, port) = split_host_port(addr)?;
        let mut req = Vec::with_capacity(22);
        req.extend_from_slice(&[SOCKS5_VERSION, CMD_CONNECT, 0x00]);
        let literal = host.parse::<IpAddr>().ok();
        match (literal, remote_dns) {
            (Some(ip), _) => push_ip(&mut req, ip),
            (None, true) => {
                let hb = host.as_bytes();
                if hb.len() > 255 {
                    return Err(NetError::AddressInvalid(format!("{host}: domain too long")));
                }
                req.push(ATYP_DOMAIN);
                req.push(hb.len() as u8);
                req.extend_from_slice(hb);
            }
            (None, false) => {
                let resolved = resolve(host, port, |_| true).await?;
                push_ip(&mut req, resolved.ip());
            }
        }
        req.extend_from_slice(&port.to_be_bytes());
        s.write_all(&req).await.map_err(io_err)?;

        let mut head = [0u8; 4];
        s.read_exact(&mut head).await.map_err(io_err)?;
        if head[0] != SOCKS5_VERSION {
            return Err(socks_err(format!("unexpected SOCKS version {}", head[0])));
        }
        if head[1] != 0x00 {
            return Err(socks_err(socks5_reply_text(head[1])));
        }
        let bound_len = match head[3] {
            ATYP_IPV4 => 4,
            ATYP_IPV6 => 16,
            ATYP_DOMAIN => {
                let mut len = [0u8; 1];
                s.read_exact(&mut len).await.map_err(io_err)?;
                len[0] as usize
            }
            other => return Err(socks_err(format!("unknown address type {other}"))),
        };
        let mut bound = vec![0u8; bound_len + 2];
        s.read_exact(&mut bound).await.map_err(io_err)?;
        Ok(())
    }

    async fn socks4_handshake(&self, s: &mut BoxedSocket, addr: &str) -> Result<(), NetError> {
        let proxy_addr = self.proxy.address();
        let io_err = |e: io::Error| NetError::io("socks", proxy_addr.clone(), e);

        let (host, port) = split_host_port(addr)?;
        let target = resolve(host, port, |a| a.is_ipv4()).await?;
        let IpAddr::V4(v4) = target.ip() else {
            return Err(NetError::AddressInvalid(format!(
                "{host}: SOCKS4 requires an IPv4 address"
            )));
        };

        let user_id = self.proxy.username.as_deref().unwrap_or("");
        let mut req = Vec::with_capacity(9 + user_id.len());
        req.push(SOCKS4_VERSION);
        req.push(CMD_CONNECT);
        req.extend_from_slice(&port.to_be_bytes());
        req.extend_from_slice(&v4.octets());
        req.extend_from_slice(user_id.as_bytes());
        req.push(0x00);
        s.write_all(&req).await.map_err(io_err)?;

        let mut rep = [0u8; 8];
        s.read_exact(&mut rep).await.map_err(io_err)?;
        if rep[1] != SOCKS4_GRANTED {
            return Err(socks_err(format!(
                "SOCKS4 request rejected (code {:#04x})",
                rep[1]
            )));
        }
        Ok(())
    }
}

impl Dial for SocksDialer {
    fn dial(&self, addr: &str) -> Dialing {
        let this = self.clone();
        let addr = addr.to_string();
        Box::pin(async move { this.connect(&addr).await })
    }
}

fn push_ip(req: &mut Vec<u8>, ip: IpAddr) {
    match ip {
        IpAddr::V4(v4) => {
            req.push(ATYP_IPV4);
            req.extend_from_slice(&v4.octets());
        }
        IpAddr::V6(v6) => {
            req.push(ATYP_IPV6);
            req.extend_from_slice(&v6.octets());
        }
    }
}

async fn resolve(
    host: &str,
    port: u16,
    accept: impl Fn(&SocketAddr) -> bool,
) -> Result<SocketAddr, NetError> {
    let not_found = || NetError::NameNotResolvedFor {
        domain: host.to_string(),
        source: Arc::new(io::Error::new(
            io::ErrorKind::NotFound,
            "no usable address for SOCKS request",
        )),
    };
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| NetError::NameNotResolvedFor {
            domain: host.to_string(),
            source: Arc::new(e),
        })?;
    addrs.find(|a| accept(a)).ok_or_else(not_found)
}

fn socks_err(msg: impl Into<String>) -> NetError {
    NetError::SocksConnectionFailed(msg.into())
}

fn socks5_reply_text(code: u8) -> String {
    let text = match code {
        0x01 => "general SOCKS server failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown SOCKS error",
    };
    format!("{text} (code {code})")
}
