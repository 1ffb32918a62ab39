//! HTTP/2 CONNECT exchanges as byte streams.
//!
//! A [`TunnelConnection`] is one HTTP/2 client connection to a proxy. Each
//! CONNECT request opened on it becomes an [`H2Stream`]: reads drain the
//! response body, writes feed the request body. The two directions close
//! independently; [`H2Stream::close_connection`] tears down the proxy
//! connection underneath every stream.

use crate::base::neterror::NetError;
use crate::http::h2settings::H2Settings;
use crate::socket::stream::BoxedSocket;
use bytes::{Buf, Bytes};
use http::{Request, StatusCode};
use http2::client::SendRequest;
use http2::{Reason, RecvStream, SendStream};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::task::AbortHandle;

/// An HTTP/2 client connection to a proxy, shared by every tunnel opened
/// on it.
pub struct TunnelConnection {
    sender: SendRequest<Bytes>,
    driver: AbortHandle,
    closed: Arc<AtomicBool>,
    proxy: String,
}

impl TunnelConnection {
    /// Runs the HTTP/2 preface over `io` and spawns the connection driver.
    pub async fn handshake(
        io: BoxedSocket,
        settings: &H2Settings,
        proxy: &str,
    ) -> Result<Arc<Self>, NetError> {
        let mut builder = http2::client::Builder::new();
        settings.apply_to_tunnel(&mut builder);
        let (sender, connection) = builder.handshake::<_, Bytes>(io).await?;

        let closed = Arc::new(AtomicBool::new(false));
        let driver_closed = closed.clone();
        let peer = proxy.to_string();
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(proxy = %peer, error = %e, "tunnel connection closed with error");
            } else {
                tracing::trace!(proxy = %peer, "tunnel connection closed");
            }
            driver_closed.store(true, Ordering::Release);
        });

        Ok(Arc::new(Self {
            sender,
            driver: driver.abort_handle(),
            closed,
            proxy: proxy.to_string(),
        }))
    }

    /// Whether another CONNECT can be issued on this connection.
    pub fn can_take_new_request(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.driver.is_finished()
    }

    /// Issues `req` (a CONNECT) and wraps the exchange once the proxy
    /// answers 200.
    pub async fn open(self: &Arc<Self>, req: Request<()>) -> Result<H2Stream, NetError> {
        let mut sender = self.sender.clone().ready().await?;
        let (response, send) = sender.send_request(req, false)?;
        let response = response.await?;

        let status = response.status();
        if status != StatusCode::OK {
            tracing::debug!(proxy = %self.proxy, status = status.as_u16(), "CONNECT rejected over HTTP/2");
            return Err(NetError::ProxyRejected {
                code: status.as_u16(),
                text: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }

        Ok(H2Stream {
            send: Some(send),
            recv: Some(response.into_body()),
            pending: Bytes::new(),
            conn: self.clone(),
        })
    }

    /// Tears the proxy connection down, failing every open stream.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.driver.abort();
    }
}

impl std::fmt::Debug for TunnelConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelConnection")
            .field("proxy", &self.proxy)
            .field("closed", &!self.can_take_new_request())
            .finish()
    }
}

/// One CONNECT exchange used as a bidirectional stream.
pub struct H2Stream {
    send: Option<SendStream<Bytes>>,
    recv: Option<RecvStream>,
    pending: Bytes,
    conn: Arc<TunnelConnection>,
}

impl H2Stream {
    /// Ends the request body. Response data keeps flowing.
    pub fn close_write(&mut self) {
        if let Some(mut send) = self.send.take() {
            let _ = send.send_data(Bytes::new(), true);
        }
    }

    /// Stops reading the response body. Writes keep flowing.
    pub fn close_read(&mut self) {
        self.recv = None;
        self.pending.clear();
    }

    /// Closes both directions of this exchange. The proxy connection stays
    /// up for other streams.
    pub fn close(&mut self) {
        self.close_write();
        self.close_read();
    }

    /// Closes this exchange and the proxy connection beneath it.
    pub fn close_connection(&mut self) {
        self.close();
        self.conn.close();
    }

    pub fn connection(&self) -> &Arc<TunnelConnection> {
        &self.conn
    }
}

impl AsyncRead for H2Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.pending.is_empty() {
                let n = this.pending.len().min(buf.remaining());
                buf.put_slice(&this.pending[..n]);
                this.pending.advance(n);
                return Poll::Ready(Ok(()));
            }

            let Some(recv) = this.recv.as_mut() else {
                return Poll::Ready(Ok(()));
            };

            match ready!(recv.poll_data(cx)) {
                Some(Ok(chunk)) => {
                    let _ = recv.flow_control().release_capacity(chunk.len());
                    this.pending = chunk;
                }
                Some(Err(e)) if e.reason() == Some(Reason::NO_ERROR) => {
                    this.recv = None;
                    return Poll::Ready(Ok(()));
                }
                Some(Err(e)) => return Poll::Ready(Err(h2_to_io_error(e))),
                None => {
                    this.recv = None;
                    return Poll::Ready(Ok(()));
                }
            }
        }
    }
}

impl AsyncWrite for H2Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let Some(send) = this.send.as_mut() else {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "tunnel write side closed",
            )));
        };
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        send.reserve_capacity(buf.len());
        match ready!(send.poll_capacity(cx)) {
            Some(Ok(0)) => {
                cx.waker().wake_by_ref();
                Poll::Pending
            }
            Some(Ok(cnt)) => {
                let cnt = cnt.min(buf.len());
                send.send_data(Bytes::copy_from_slice(&buf[..cnt]), false)
                    .map_err(h2_to_io_error)?;
                Poll::Ready(Ok(cnt))
            }
            Some(Err(e)) => Poll::Ready(Err(h2_to_io_error(e))),
            None => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "tunnel stream reset by proxy",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().close_write();
        Poll::Ready(Ok(()))
    }
}

fn h2_to_io_error(e: http2::Error) -> io::Error {
    if e.is_io() {
        e.into_io()
            .unwrap_or_else(|| io::Error::other("HTTP/2 tunnel I/O error"))
    } else {
        io::Error::other(e)
    }
}
