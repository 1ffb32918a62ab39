//! Type-erased byte streams.
//!
//! Every dialer in this crate hands back a [`BoxedSocket`]: a direct TCP
//! connection, a TLS session to a proxy, a SOCKS-negotiated connection, or
//! an HTTP/2 CONNECT stream. Callers layer TLS and HTTP on top without
//! knowing which one they got.
//!
//! [`TunnelStream`] is what the tunnel dialer produces before erasure; it
//! keeps the per-direction and whole-connection close operations.

use crate::socket::h2stream::H2Stream;
use bytes::{Buf, Bytes};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_boring::SslStream;

/// Any socket that supports async read/write operations.
pub trait StreamSocket: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl StreamSocket for TcpStream {}

impl StreamSocket for tokio::io::DuplexStream {}

impl<S: StreamSocket> StreamSocket for SslStream<S> {}

impl StreamSocket for H2Stream {}

/// Boxed, object-safe [`StreamSocket`].
pub struct BoxedSocket {
    inner: Pin<Box<dyn StreamSocket>>,
}

impl BoxedSocket {
    pub fn new<S: StreamSocket>(socket: S) -> Self {
        Self {
            inner: Box::pin(socket),
        }
    }
}

impl std::fmt::Debug for BoxedSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxedSocket").finish_non_exhaustive()
    }
}

impl StreamSocket for BoxedSocket {}

impl AsyncRead for BoxedSocket {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        self.inner.as_mut().poll_read(cx, buf)
    }
}

impl AsyncWrite for BoxedSocket {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.inner.as_mut().poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.inner.as_mut().poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.inner.as_mut().poll_shutdown(cx)
    }
}

enum TunnelKind {
    Raw(BoxedSocket),
    H2(H2Stream),
    Closed,
}

/// A stream to a target through a proxy.
///
/// Bytes the proxy sent after its CONNECT reply head are replayed before
/// anything read from the socket.
pub struct TunnelStream {
    kind: TunnelKind,
    prefix: Bytes,
    read_closed: bool,
}

impl TunnelStream {
    /// A SOCKS or HTTP/1.1 CONNECT tunnel.
    pub fn raw(socket: BoxedSocket) -> Self {
        Self::raw_with_prefix(socket, Bytes::new())
    }

    pub fn raw_with_prefix(socket: BoxedSocket, prefix: Bytes) -> Self {
        Self {
            kind: TunnelKind::Raw(socket),
            prefix,
            read_closed: false,
        }
    }

    /// A CONNECT exchange on a shared HTTP/2 proxy connection.
    pub fn h2(stream: H2Stream) -> Self {
        Self {
            kind: TunnelKind::H2(stream),
            prefix: Bytes::new(),
            read_closed: false,
        }
    }

    pub fn is_h2(&self) -> bool {
        matches!(self.kind, TunnelKind::H2(_))
    }

    /// Stops reading: later reads report end of stream. Writes keep flowing.
    pub fn close_read(&mut self) {
        self.read_closed = true;
        self.prefix.clear();
        if let TunnelKind::H2(stream) = &mut self.kind {
            stream.close_read();
        }
    }

    /// Closes the tunnel and the proxy connection it runs on. For HTTP/2
    /// this fails every other tunnel sharing the connection.
    pub fn close_connection(&mut self) {
        self.read_closed = true;
        self.prefix.clear();
        match std::mem::replace(&mut self.kind, TunnelKind::Closed) {
            TunnelKind::H2(mut stream) => stream.close_connection(),
            TunnelKind::Raw(socket) => drop(socket),
            TunnelKind::Closed => {}
        }
    }

    /// The underlying HTTP/2 exchange, if any.
    pub fn as_h2_mut(&mut self) -> Option<&mut H2Stream> {
        match &mut self.kind {
            TunnelKind::H2(stream) => Some(stream),
            _ => None,
        }
    }
}

impl std::fmt::Debug for TunnelStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            TunnelKind::Raw(_) => "raw",
            TunnelKind::H2(_) => "h2",
            TunnelKind::Closed => "closed",
        };
        f.debug_struct("TunnelStream")
            .field("kind", &kind)
            .field("read_closed", &self.read_closed)
            .finish()
    }
}

impl StreamSocket for TunnelStream {}

fn closed_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "tunnel closed")
}

impl AsyncRead for TunnelStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.read_closed {
            return Poll::Ready(Ok(()));
        }
        if !this.prefix.is_empty() {
            let n = this.prefix.len().min(buf.remaining());
            buf.put_slice(&this.prefix[..n]);
            this.prefix.advance(n);
            return Poll::Ready(Ok(()));
        }
        match &mut this.kind {
            TunnelKind::Raw(socket) => Pin::new(socket).poll_read(cx, buf),
            TunnelKind::H2(stream) => Pin::new(stream).poll_read(cx, buf),
            TunnelKind::Closed => Poll::Ready(Ok(())),
        }
    }
}

impl AsyncWrite for TunnelStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.get_mut().kind {
            TunnelKind::Raw(socket) => Pin::new(socket).poll_write(cx, buf),
            TunnelKind::H2(stream) => Pin::new(stream).poll_write(cx, buf),
            TunnelKind::Closed => Poll::Ready(Err(closed_pipe())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().kind {
            TunnelKind::Raw(socket) => Pin::new(socket).poll_flush(cx),
            TunnelKind::H2(stream) => Pin::new(stream).poll_flush(cx),
            TunnelKind::Closed => Poll::Ready(Ok(())),
        }
    }

    /// Half-closes the write direction.
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().kind {
            TunnelKind::Raw(socket) => Pin::new(socket).poll_shutdown(cx),
            TunnelKind::H2(stream) => Pin::new(stream).poll_shutdown(cx),
            TunnelKind::Closed => Poll::Ready(Ok(())),
        }
    }
}
