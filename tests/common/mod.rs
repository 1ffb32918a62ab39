//! Local servers shared by the integration tests.

#![allow(dead_code)]

use boring::pkey::PKey;
use boring::ssl::{select_next_proto, AlpnError, SslAcceptor, SslMethod};
use boring::x509::X509;
use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const TEST_UA: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// A running server and the number of TCP connections it accepted.
pub struct Server {
    pub addr: SocketAddr,
    pub accepts: Arc<AtomicUsize>,
    pub heads: Arc<Mutex<Vec<String>>>,
}

impl Server {
    pub fn accepted(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }

    pub fn url(&self, scheme: &str) -> String {
        format!("{scheme}://{}", self.addr)
    }

    pub fn last_head(&self) -> String {
        self.heads.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

async fn bind() -> (TcpListener, SocketAddr, Arc<AtomicUsize>, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr, Arc::new(AtomicUsize::new(0)), Arc::new(Mutex::new(Vec::new())))
}

/// Self-signed acceptor selecting the first of `alpn` the client offers.
pub fn acceptor(alpn: &[&str]) -> SslAcceptor {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert = X509::from_pem(certified.cert.pem().as_bytes()).unwrap();
    let key = PKey::private_key_from_pem(certified.signing_key.serialize_pem().as_bytes()).unwrap();

    let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).unwrap();
    builder.set_certificate(&cert).unwrap();
    builder.set_private_key(&key).unwrap();

    let mut wire = Vec::new();
    for proto in alpn {
        wire.push(proto.len() as u8);
        wire.extend_from_slice(proto.as_bytes());
    }
    builder.set_alpn_select_callback(move |_, client| {
        select_next_proto(&wire, client).ok_or(AlpnError::NOACK)
    });
    builder.build()
}

/// Echoes request metadata as `version|user-agent|cookie`.
async fn echo(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    };
    let body = format!(
        "{:?}|{}|{}",
        req.version(),
        header("user-agent"),
        header("cookie")
    );
    Ok(Response::new(Full::new(Bytes::from(body))))
}

/// HTTPS origin speaking HTTP/2 or HTTP/1.1 depending on ALPN.
pub async fn tls_origin(alpn: &[&str]) -> Server {
    let acceptor = Arc::new(acceptor(alpn));
    let (listener, addr, accepts, heads) = bind().await;
    let counter = accepts.clone();
    tokio::spawn(async move {
        loop {
            let Ok((tcp, _)) = listener.accept().await else { return };
            counter.fetch_add(1, Ordering::SeqCst);
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let Ok(tls) = tokio_boring::accept(&acceptor, tcp).await else { return };
                let h2 = tls.ssl().selected_alpn_protocol() == Some(b"h2".as_slice());
                let io = TokioIo::new(tls);
                if h2 {
                    let _ = hyper::server::conn::http2::Builder::new(TokioExecutor::new())
                        .serve_connection(io, service_fn(echo))
                        .await;
                } else {
                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(io, service_fn(echo))
                        .await;
                }
            });
        }
    });
    Server { addr, accepts, heads }
}

/// Plain HTTP/1.1 origin.
pub async fn plain_origin() -> Server {
    let (listener, addr, accepts, heads) = bind().await;
    let counter = accepts.clone();
    tokio::spawn(async move {
        loop {
            let Ok((tcp, _)) = listener.accept().await else { return };
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(tcp), service_fn(echo))
                    .await;
            });
        }
    });
    Server { addr, accepts, heads }
}

/// TCP server echoing bytes back.
pub async fn echo_server() -> Server {
    let (listener, addr, accepts, heads) = bind().await;
    let counter = accepts.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut tcp, _)) = listener.accept().await else { return };
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let (mut r, mut w) = tcp.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });
    Server { addr, accepts, heads }
}

async fn read_head(tcp: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    while !buf.ends_with(b"\r\n\r\n") {
        if tcp.read(&mut byte).await.ok()? == 0 {
            return None;
        }
        buf.push(byte[0]);
    }
    String::from_utf8(buf).ok()
}

/// HTTP/1.1 CONNECT proxy. With `reply` set, answers every CONNECT with it
/// instead of tunneling and keeps the connection open until the client
/// closes it.
pub async fn connect_proxy(reply: Option<&'static str>) -> Server {
    let (listener, addr, accepts, heads) = bind().await;
    let counter = accepts.clone();
    let seen = heads.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut tcp, _)) = listener.accept().await else { return };
            counter.fetch_add(1, Ordering::SeqCst);
            let seen = seen.clone();
            tokio::spawn(async move {
                let Some(head) = read_head(&mut tcp).await else { return };
                seen.lock().unwrap().push(head.clone());
                if let Some(reply) = reply {
                    let _ = tcp.write_all(reply.as_bytes()).await;
                    let mut sink = [0u8; 256];
                    while matches!(tcp.read(&mut sink).await, Ok(n) if n > 0) {}
                    return;
                }
                let target = head.split_whitespace().nth(1).unwrap_or_default().to_string();
                let Ok(mut upstream) = TcpStream::connect(&target).await else {
                    let _ = tcp.write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n").await;
                    return;
                };
                let _ = tcp
                    .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
                    .await;
                let _ = tokio::io::copy_bidirectional(&mut tcp, &mut upstream).await;
            });
        }
    });
    Server { addr, accepts, heads }
}

/// TLS proxy that negotiates `h2` and serves CONNECT as HTTP/2 streams.
/// Requests carrying `x-reject: <code>` are answered with that status.
pub async fn h2_connect_proxy() -> Server {
    h2_connect_proxy_limited(usize::MAX).await
}

/// Like [`h2_connect_proxy`], but answers 503 to every CONNECT past the
/// first `per_connection` on one connection.
pub async fn h2_connect_proxy_limited(per_connection: usize) -> Server {
    let acceptor = Arc::new(acceptor(&["h2"]));
    let (listener, addr, accepts, heads) = bind().await;
    let counter = accepts.clone();
    let seen = heads.clone();
    tokio::spawn(async move {
        loop {
            let Ok((tcp, _)) = listener.accept().await else { return };
            counter.fetch_add(1, Ordering::SeqCst);
            let acceptor = acceptor.clone();
            let seen = seen.clone();
            tokio::spawn(async move {
                let Ok(tls) = tokio_boring::accept(&acceptor, tcp).await else { return };
                let opened = Arc::new(AtomicUsize::new(0));
                let service = service_fn(move |req| {
                    let over = opened.fetch_add(1, Ordering::SeqCst) >= per_connection;
                    h2_connect(req, seen.clone(), over)
                });
                let _ = hyper::server::conn::http2::Builder::new(TokioExecutor::new())
                    .serve_connection(TokioIo::new(tls), service)
                    .await;
            });
        }
    });
    Server { addr, accepts, heads }
}

async fn h2_connect(
    mut req: Request<Incoming>,
    seen: Arc<Mutex<Vec<String>>>,
    over_limit: bool,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let target = req.uri().authority().map(|a| a.to_string()).unwrap_or_default();
    let mut head = format!("{} {}\r\n", req.method(), target);
    for (name, value) in req.headers() {
        head.push_str(&format!("{}: {}\r\n", name, value.to_str().unwrap_or("")));
    }
    seen.lock().unwrap().push(head);

    let status = |code: u16| {
        let mut resp = Response::new(Full::new(Bytes::new()));
        *resp.status_mut() = StatusCode::from_u16(code).unwrap();
        Ok(resp)
    };
    if req.method() != Method::CONNECT {
        return status(405);
    }
    if over_limit {
        return status(503);
    }
    if let Some(code) = req
        .headers()
        .get("x-reject")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u16>().ok())
    {
        return status(code);
    }

    let Ok(mut upstream) = TcpStream::connect(&target).await else {
        return status(502);
    };
    tokio::spawn(async move {
        if let Ok(upgraded) = hyper::upgrade::on(&mut req).await {
            let mut tunnel = TokioIo::new(upgraded);
            let _ = tokio::io::copy_bidirectional(&mut tunnel, &mut upstream).await;
        }
    });
    status(200)
}

/// SOCKS5 proxy requiring `user:pw` when `auth` is set. Records the
/// requested target as `host:port` (domain or IP as sent).
pub async fn socks5_proxy(auth: bool) -> Server {
    let (listener, addr, accepts, heads) = bind().await;
    let counter = accepts.clone();
    let seen = heads.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut tcp, _)) = listener.accept().await else { return };
            counter.fetch_add(1, Ordering::SeqCst);
            let seen = seen.clone();
            tokio::spawn(async move {
                let _ = socks5_session(&mut tcp, auth, seen).await;
            });
        }
    });
    Server { addr, accepts, heads }
}

async fn socks5_session(
    tcp: &mut TcpStream,
    auth: bool,
    seen: Arc<Mutex<Vec<String>>>,
) -> std::io::Result<()> {
    let mut greeting = [0u8; 2];
    tcp.read_exact(&mut greeting).await?;
    let mut methods = vec![0u8; greeting[1] as usize];
    tcp.read_exact(&mut methods).await?;

    if auth {
        if !methods.contains(&0x02) {
            tcp.write_all(&[0x05, 0xff]).await?;
            return Ok(());
        }
        tcp.write_all(&[0x05, 0x02]).await?;
        let mut ver_len = [0u8; 2];
        tcp.read_exact(&mut ver_len).await?;
        let mut user = vec![0u8; ver_len[1] as usize];
        tcp.read_exact(&mut user).await?;
        let mut plen = [0u8; 1];
        tcp.read_exact(&mut plen).await?;
        let mut pass = vec![0u8; plen[0] as usize];
        tcp.read_exact(&mut pass).await?;
        let ok = user == b"user" && pass == b"pw";
        tcp.write_all(&[0x01, if ok { 0x00 } else { 0x01 }]).await?;
        if !ok {
            return Ok(());
        }
    } else {
        tcp.write_all(&[0x05, 0x00]).await?;
    }

    let mut head = [0u8; 4];
    tcp.read_exact(&mut head).await?;
    let host = match head[3] {
        0x01 => {
            let mut ip = [0u8; 4];
            tcp.read_exact(&mut ip).await?;
            std::net::Ipv4Addr::from(ip).to_string()
        }
        0x03 => {
            let mut len = [0u8; 1];
            tcp.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            tcp.read_exact(&mut name).await?;
            String::from_utf8_lossy(&name).into_owned()
        }
        _ => {
            let mut ip = [0u8; 16];
            tcp.read_exact(&mut ip).await?;
            format!("[{}]", std::net::Ipv6Addr::from(ip))
        }
    };
    let mut port = [0u8; 2];
    tcp.read_exact(&mut port).await?;
    let target = format!("{host}:{}", u16::from_be_bytes(port));
    seen.lock().unwrap().push(target.clone());

    let connect_to = target.replace("localhost", "127.0.0.1");
    let Ok(mut upstream) = TcpStream::connect(&connect_to).await else {
        tcp.write_all(&[0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0]).await?;
        return Ok(());
    };
    tcp.write_all(&[0x05, 0x00, 0x00, 0x01, 127, 0, 0, 1, 0, 0]).await?;
    tokio::io::copy_bidirectional(tcp, &mut upstream).await?;
    Ok(())
}

/// SOCKS4 proxy. Records `ip:port|user_id`.
pub async fn socks4_proxy() -> Server {
    let (listener, addr, accepts, heads) = bind().await;
    let counter = accepts.clone();
    let seen = heads.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut tcp, _)) = listener.accept().await else { return };
            counter.fetch_add(1, Ordering::SeqCst);
            let seen = seen.clone();
            tokio::spawn(async move {
                let _ = socks4_session(&mut tcp, seen).await;
            });
        }
    });
    Server { addr, accepts, heads }
}

async fn socks4_session(tcp: &mut TcpStream, seen: Arc<Mutex<Vec<String>>>) -> std::io::Result<()> {
    let mut head = [0u8; 8];
    tcp.read_exact(&mut head).await?;
    let port = u16::from_be_bytes([head[2], head[3]]);
    let ip = std::net::Ipv4Addr::new(head[4], head[5], head[6], head[7]);
    let mut user = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        tcp.read_exact(&mut byte).await?;
        if byte[0] == 0 {
            break;
        }
        user.push(byte[0]);
    }
    let target = format!("{ip}:{port}");
    seen.lock()
        .unwrap()
        .push(format!("{target}|{}", String::from_utf8_lossy(&user)));

    let mut upstream = TcpStream::connect(&target).await?;
    tcp.write_all(&[0x00, 0x5a, 0, 0, 0, 0, 0, 0]).await?;
    tokio::io::copy_bidirectional(tcp, &mut upstream).await?;
    Ok(())
}

/// Collects a response body into a string.
pub async fn body_string(resp: Response<Incoming>) -> String {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8_lossy(&bytes).into_owned()
}
