//! Transport layer
//!
//! Endpoints are either local (`ipc://` Unix domain sockets) or TCP. Frames
//! are self-delimiting via the body length in the frame header, so the
//! transport only has to find frame boundaries in the byte stream.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tracing::{debug, warn};

use crate::error::{MiddlewareError, Result};
use crate::frame::FrameHeader;

/// Maximum frame size (4 MB default)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Address of an object adapter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Unix domain socket at the given path
    Ipc(PathBuf),
    /// TCP `host:port`
    Tcp(String),
}

impl Endpoint {
    pub fn parse(s: &str) -> Result<Self> {
        let bad = |reason: &str| MiddlewareError::BadEndpoint {
            endpoint: s.to_string(),
            reason: reason.to_string(),
        };
        if let Some(path) = s.strip_prefix("ipc://") {
            if path.is_empty() {
                return Err(bad("empty path"));
            }
            Ok(Endpoint::Ipc(PathBuf::from(path)))
        } else if let Some(addr) = s.strip_prefix("tcp://") {
            if addr.is_empty() || !addr.contains(':') {
                return Err(bad("expected host:port"));
            }
            Ok(Endpoint::Tcp(addr.to_string()))
        } else {
            Err(bad("unsupported transport (expected ipc:// or tcp://)"))
        }
    }

    /// Open an outbound connection
    pub async fn connect(&self) -> Result<Connection> {
        match self {
            Endpoint::Ipc(path) => Ok(Connection::Unix(UnixStream::connect(path).await?)),
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr.as_str()).await?;
                stream.set_nodelay(true)?;
                Ok(Connection::Tcp(stream))
            }
        }
    }

    /// Bind a listener. A stale socket file left behind by a dead process is
    /// removed; a live one makes the bind fail.
    pub async fn bind(&self) -> Result<Listener> {
        match self {
            Endpoint::Ipc(path) => {
                if path.exists() {
                    if UnixStream::connect(path).await.is_ok() {
                        return Err(MiddlewareError::Io(io::Error::new(
                            io::ErrorKind::AddrInUse,
                            format!("address in use: {}", self),
                        )));
                    }
                    debug!("Removing stale socket file {}", path.display());
                    std::fs::remove_file(path)?;
                }
                let listener = UnixListener::bind(path)?;
                Ok(Listener::Unix {
                    listener,
                    path: path.clone(),
                })
            }
            Endpoint::Tcp(addr) => Ok(Listener::Tcp(TcpListener::bind(addr.as_str()).await?)),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Ipc(path) => write!(f, "ipc://{}", path.display()),
            Endpoint::Tcp(addr) => write!(f, "tcp://{}", addr),
        }
    }
}

/// Bound server socket
#[derive(Debug)]
pub enum Listener {
    Unix { listener: UnixListener, path: PathBuf },
    Tcp(TcpListener),
}

impl Listener {
    /// Accept a connection, returning it with a printable peer name
    pub async fn accept(&self) -> Result<(Connection, String)> {
        match self {
            Listener::Unix { listener, path } => {
                let (stream, _) = listener.accept().await?;
                Ok((Connection::Unix(stream), path.display().to_string()))
            }
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok((Connection::Tcp(stream), peer.to_string()))
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Listener::Unix { path, .. } = self {
            if let Err(e) = std::fs::remove_file(&*path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Could not remove socket file {}: {}", path.display(), e);
                }
            }
        }
    }
}

/// Byte stream to a peer
#[derive(Debug)]
pub enum Connection {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Unix(s) => Pin::new(s).poll_read(cx, buf),
            Connection::Tcp(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Connection::Unix(s) => Pin::new(s).poll_write(cx, buf),
            Connection::Tcp(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Unix(s) => Pin::new(s).poll_flush(cx),
            Connection::Tcp(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Unix(s) => Pin::new(s).poll_shutdown(cx),
            Connection::Tcp(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Frame reader/writer over any byte stream
pub struct FrameTransport<T> {
    inner: T,
    max_frame_size: usize,
    read_buf: BytesMut,
}

impl<T> FrameTransport<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            read_buf: BytesMut::with_capacity(8192),
        }
    }

    pub fn with_max_frame_size(mut self, max_size: usize) -> Self {
        self.max_frame_size = max_size;
        self
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: AsyncRead + Unpin> FrameTransport<T> {
    /// Read one complete frame. A clean close between frames is reported as
    /// `ConnectionClosed`.
    pub async fn read_frame(&mut self) -> Result<Bytes> {
        while self.read_buf.len() < FrameHeader::SIZE {
            if self.fill_buf().await? == 0 {
                if self.read_buf.is_empty() {
                    return Err(MiddlewareError::ConnectionClosed);
                }
                return Err(MiddlewareError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "incomplete frame header",
                )));
            }
        }

        let header = FrameHeader::decode(&self.read_buf)?;
        let frame_length = header.frame_length();
        if frame_length > self.max_frame_size {
            return Err(MiddlewareError::FrameTooLarge {
                size: frame_length,
                max: self.max_frame_size,
            });
        }

        while self.read_buf.len() < frame_length {
            if self.fill_buf().await? == 0 {
                return Err(MiddlewareError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "incomplete frame: expected {} bytes, got {}",
                        frame_length,
                        self.read_buf.len()
                    ),
                )));
            }
        }

        Ok(self.read_buf.split_to(frame_length).freeze())
    }

    async fn fill_buf(&mut self) -> Result<usize> {
        if self.read_buf.capacity() - self.read_buf.len() < 4096 {
            self.read_buf.reserve(8192);
        }
        Ok(self.inner.read_buf(&mut self.read_buf).await?)
    }
}

impl<T: AsyncWrite + Unpin> FrameTransport<T> {
    /// Write one encoded frame
    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        if frame.len() > self.max_frame_size {
            return Err(MiddlewareError::FrameTooLarge {
                size: frame.len(),
                max: self.max_frame_size,
            });
        }
        self.inner.write_all(frame).await?;
        self.inner.flush().await?;
        Ok(())
    }
}
