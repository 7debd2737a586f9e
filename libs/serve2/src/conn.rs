//! Connections with replay support and a hint chain.
//!
//! Detection reads the first bytes of a connection before any handler owns
//! it. Those bytes are pushed back with [`Connection::unread`] so the winning
//! handler reads the stream from its very first byte.
//!
//! Every transformation a connection goes through (accepted from a TCP
//! listener, terminated as TLS) appends a [`Hint`]. Handlers look hints up;
//! they never own anything through them.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Byte stream a connection can wrap.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

/// Type-erased stream.
pub type BoxedStream = Box<dyn Stream>;

/// Parameters negotiated by an inbound TLS handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsHint {
    /// Server name sent by the client (SNI), if any.
    pub server_name: Option<String>,
    /// Application protocol selected through ALPN, if any.
    pub negotiated_protocol: Option<String>,
    /// Whether both sides agreed on the negotiated protocol.
    pub negotiated_protocol_is_mutual: bool,
}

/// One record in a connection's hint chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hint {
    /// Accepted from a TCP listener.
    Tcp {
        peer_addr: SocketAddr,
        local_addr: SocketAddr,
    },
    /// Terminated as TLS.
    Tls(TlsHint),
}

/// A client connection as seen by the dispatcher and handlers.
pub struct Connection {
    inner: BoxedStream,
    replay: BytesMut,
    hints: Vec<Hint>,
}

impl Connection {
    /// Wrap a stream with an existing hint chain.
    pub fn new(inner: BoxedStream, hints: Vec<Hint>) -> Self {
        Self {
            inner,
            replay: BytesMut::new(),
            hints,
        }
    }

    /// Wrap a freshly accepted TCP stream.
    pub fn from_tcp(stream: tokio::net::TcpStream) -> io::Result<Self> {
        let hint = Hint::Tcp {
            peer_addr: stream.peer_addr()?,
            local_addr: stream.local_addr()?,
        };
        Ok(Self::new(Box::new(stream), vec![hint]))
    }

    /// Push bytes back so they are returned by the next reads, ahead of
    /// anything still buffered or unread on the inner stream.
    pub fn unread(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut replay = BytesMut::with_capacity(bytes.len() + self.replay.len());
        replay.extend_from_slice(bytes);
        replay.extend_from_slice(&self.replay);
        self.replay = replay;
    }

    /// Number of bytes waiting to be replayed.
    pub fn replay_len(&self) -> usize {
        self.replay.len()
    }

    /// Append a hint to the chain.
    pub fn push_hint(&mut self, hint: Hint) {
        self.hints.push(hint);
    }

    /// The hint chain, oldest first.
    pub fn hints(&self) -> &[Hint] {
        &self.hints
    }

    /// The most recent TLS hint, if the connection was terminated as TLS.
    pub fn tls_hint(&self) -> Option<&TlsHint> {
        last_tls_hint(&self.hints)
    }

    /// Peer address of the underlying TCP connection, if known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.hints.iter().find_map(|hint| match hint {
            Hint::Tcp { peer_addr, .. } => Some(*peer_addr),
            Hint::Tls(_) => None,
        })
    }
}

/// Find the most recent TLS record in a hint chain.
pub fn last_tls_hint(hints: &[Hint]) -> Option<&TlsHint> {
    hints.iter().rev().find_map(|hint| match hint {
        Hint::Tls(tls) => Some(tls),
        Hint::Tcp { .. } => None,
    })
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("replay_len", &self.replay.len())
            .field("hints", &self.hints)
            .finish_non_exhaustive()
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.replay.is_empty() {
            let n = this.replay.len().min(buf.remaining());
            buf.put_slice(&this.replay[..n]);
            this.replay.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
