//! Sockets the gate can tear down.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::policy::PolicyDenial;

/// Teardown capability over a connection owned by the transport.
///
/// The gate calls [`end`](GatedSocket::end) first and
/// [`destroy`](GatedSocket::destroy) only while
/// [`is_destroyed`](GatedSocket::is_destroyed) is false.
#[async_trait]
pub trait GatedSocket: Send {
    /// Graceful half-close.
    async fn end(&mut self) -> io::Result<()>;

    /// Forced teardown. Later I/O fails with the denial.
    fn destroy(&mut self, denial: &PolicyDenial);

    /// Check if the socket is already gone.
    fn is_destroyed(&self) -> bool;
}

/// A stream with an explicit destroyed state.
///
/// Reads and writes are passed through to the inner stream until
/// [`GatedSocket::destroy`] drops it; after that they fail.
#[derive(Debug)]
pub struct GatedStream<S> {
    inner: Option<S>,
    destroyed_by: Option<String>,
}

impl<S> GatedStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner: Some(inner),
            destroyed_by: None,
        }
    }

    /// The inner stream, unless destroyed.
    pub fn get_ref(&self) -> Option<&S> {
        self.inner.as_ref()
    }

    /// The inner stream, unless destroyed.
    pub fn get_mut(&mut self) -> Option<&mut S> {
        self.inner.as_mut()
    }

    /// Unwrap the inner stream, unless destroyed.
    pub fn into_inner(self) -> Option<S> {
        self.inner
    }

    fn destroyed_error(&self) -> io::Error {
        match &self.destroyed_by {
            Some(reason) => io::Error::new(io::ErrorKind::PermissionDenied, reason.clone()),
            None => io::Error::new(io::ErrorKind::NotConnected, "socket destroyed"),
        }
    }
}

impl GatedStream<tokio::net::TcpStream> {
    /// Remote address of the connection.
    pub fn peer_addr(&self) -> io::Result<std::net::SocketAddr> {
        match &self.inner {
            Some(stream) => stream.peer_addr(),
            None => Err(self.destroyed_error()),
        }
    }

    /// Local address of the connection.
    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        match &self.inner {
            Some(stream) => stream.local_addr(),
            None => Err(self.destroyed_error()),
        }
    }
}

#[async_trait]
impl<S> GatedSocket for GatedStream<S>
where
    S: AsyncWrite + Unpin + Send,
{
    async fn end(&mut self) -> io::Result<()> {
        match self.inner.as_mut() {
            Some(stream) => stream.shutdown().await,
            None => Ok(()),
        }
    }

    fn destroy(&mut self, denial: &PolicyDenial) {
        self.inner = None;
        self.destroyed_by = Some(denial.to_string());
    }

    fn is_destroyed(&self) -> bool {
        self.inner.is_none()
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for GatedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.inner.as_mut() {
            Some(stream) => Pin::new(stream).poll_read(cx, buf),
            None => Poll::Ready(Err(this.destroyed_error())),
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for GatedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match this.inner.as_mut() {
            Some(stream) => Pin::new(stream).poll_write(cx, buf),
            None => Poll::Ready(Err(this.destroyed_error())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.inner.as_mut() {
            Some(stream) => Pin::new(stream).poll_flush(cx),
            None => Poll::Ready(Err(this.destroyed_error())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.inner.as_mut() {
            Some(stream) => Pin::new(stream).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}
