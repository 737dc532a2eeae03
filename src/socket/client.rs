use futures::task::noop_waker_ref;
use parking_lot::Mutex;
use std::fmt;
use std::io::ErrorKind;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

use crate::http::protocol::Protocol;

/// A connected socket, plain or TLS.
#[derive(Debug)]
pub enum SocketType {
    Tcp(TcpStream),
    Ssl(tokio_boring::SslStream<TcpStream>),
}

impl SocketType {
    fn tcp(&self) -> &TcpStream {
        match self {
            SocketType::Tcp(s) => s,
            SocketType::Ssl(s) => s.get_ref(),
        }
    }

    /// Non-blocking liveness check: peer still there and no EOF queued.
    ///
    /// Peeks rather than reads so buffered TLS records stay in place.
    pub fn is_connected(&self) -> bool {
        let stream = self.tcp();
        if stream.peer_addr().is_err() {
            return false;
        }
        let mut buf = [0u8; 1];
        let mut buf = ReadBuf::new(&mut buf);
        let mut cx = Context::from_waker(noop_waker_ref());
        match stream.poll_peek(&mut cx, &mut buf) {
            Poll::Ready(Ok(0)) => false,
            Poll::Ready(Ok(_)) => true,
            Poll::Ready(Err(ref e)) if e.kind() == ErrorKind::WouldBlock => true,
            Poll::Ready(Err(_)) => false,
            Poll::Pending => true,
        }
    }

    /// ALPN protocol selected during the handshake, if any.
    pub fn selected_alpn(&self) -> Option<&[u8]> {
        match self {
            SocketType::Tcp(_) => None,
            SocketType::Ssl(s) => s.ssl().selected_alpn_protocol(),
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, SocketType::Ssl(_))
    }
}

impl AsyncRead for SocketType {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            SocketType::Ssl(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SocketType {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            SocketType::Ssl(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_flush(cx),
            SocketType::Ssl(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            SocketType::Ssl(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

struct NegotiatedSlot {
    id: u64,
    protocol: Protocol,
    verified: bool,
    socket: Mutex<Option<SocketType>>,
}

impl Drop for NegotiatedSlot {
    fn drop(&mut self) {
        if self.socket.get_mut().is_some() {
            tracing::trace!(
                id = self.id,
                protocol = %self.protocol,
                "Destroying unclaimed negotiated socket"
            );
        }
    }
}

/// Socket left over from an ALPN probe.
///
/// Shared between the negotiator and whoever waited on the same origin; the
/// first caller to [`claim`](Self::claim) it takes ownership. When every
/// handle is dropped without a claim the socket is closed.
#[derive(Clone)]
pub struct NegotiatedSocket {
    inner: Arc<NegotiatedSlot>,
}

impl NegotiatedSocket {
    pub fn new(id: u64, protocol: Protocol, verified: bool, socket: SocketType) -> Self {
        Self {
            inner: Arc::new(NegotiatedSlot {
                id,
                protocol,
                verified,
                socket: Mutex::new(Some(socket)),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn protocol(&self) -> Protocol {
        self.inner.protocol
    }

    /// Whether the peer certificate was verified during the probe.
    pub fn verified(&self) -> bool {
        self.inner.verified
    }

    /// Take the socket. Returns `None` if already claimed or if the peer
    /// has gone away in the meantime.
    pub fn claim(&self) -> Option<SocketType> {
        let socket = self.inner.socket.lock().take()?;
        if socket.is_connected() {
            Some(socket)
        } else {
            tracing::debug!(id = self.inner.id, "Negotiated socket closed before use");
            None
        }
    }

    pub fn is_claimed(&self) -> bool {
        self.inner.socket.lock().is_none()
    }
}

impl fmt::Debug for NegotiatedSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NegotiatedSocket")
            .field("id", &self.inner.id)
            .field("protocol", &self.inner.protocol)
            .field("verified", &self.inner.verified)
            .field("claimed", &self.is_claimed())
            .finish()
    }
}
