//! Duplex stream over a pipe pair
//!
//! A child process hands us two unrelated one-way pipes: its stdout to read
//! from and its stdin to write to. The RPC layer wants a single bidirectional
//! stream, so `PipeDuplex` glues a reader and a writer together.
//!
//! Operations that only make sense on a real socket (addresses, deadlines,
//! closing a single direction) fail immediately with
//! `io::ErrorKind::Unsupported` instead of silently doing nothing.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::process::{ChildStdin, ChildStdout};
use tracing::trace;

// ============================================================================
// Duplex Stream Trait
// ============================================================================

/// Bidirectional byte stream consumed by the RPC connection
///
/// Reading and writing come from the tokio I/O traits. The remaining methods
/// mirror what a network socket offers; pipe-backed implementations reject
/// them.
pub trait DuplexStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Local address of the stream
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Address of the remote peer
    fn peer_addr(&self) -> io::Result<SocketAddr>;

    /// Deadline after which pending reads fail
    fn set_read_deadline(&mut self, deadline: Option<Instant>) -> io::Result<()>;

    /// Deadline after which pending writes fail
    fn set_write_deadline(&mut self, deadline: Option<Instant>) -> io::Result<()>;
}

fn unsupported(operation: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{operation} is not supported on a pipe pair"),
    )
}

// ============================================================================
// Pipe Duplex
// ============================================================================

/// Duplex stream assembled from an independent reader and writer
#[derive(Debug)]
pub struct PipeDuplex<R, W> {
    reader: R,
    writer: W,
}

/// Duplex over a child's stdout (inbound) and stdin (outbound)
pub type ChildDuplex = PipeDuplex<TraceReader<ChildStdout>, TraceWriter<ChildStdin>>;

impl<R, W> PipeDuplex<R, W> {
    /// Combine a reader and a writer into one stream
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Split back into the underlying reader and writer
    #[allow(dead_code)]
    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

impl<R, W> AsyncRead for PipeDuplex<R, W>
where
    R: AsyncRead + Unpin,
    W: Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().reader).poll_read(cx, buf)
    }
}

impl<R, W> AsyncWrite for PipeDuplex<R, W>
where
    R: Unpin,
    W: AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().writer).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Err(unsupported("closing one direction")))
    }
}

impl<R, W> DuplexStream for PipeDuplex<R, W>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    fn local_addr(&self) -> io::Result<SocketAddr> {
        Err(unsupported("local_addr"))
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Err(unsupported("peer_addr"))
    }

    fn set_read_deadline(&mut self, _deadline: Option<Instant>) -> io::Result<()> {
        Err(unsupported("set_read_deadline"))
    }

    fn set_write_deadline(&mut self, _deadline: Option<Instant>) -> io::Result<()> {
        Err(unsupported("set_write_deadline"))
    }
}

// ============================================================================
// Tracing Wrappers
// ============================================================================

/// Reader that logs every chunk it yields when enabled
///
/// Bytes and counts are passed through untouched.
#[derive(Debug)]
pub struct TraceReader<R> {
    inner: R,
    enabled: bool,
}

impl<R> TraceReader<R> {
    pub fn new(inner: R, enabled: bool) -> Self {
        Self { inner, enabled }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for TraceReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let result = Pin::new(&mut this.inner).poll_read(cx, buf);

        if this.enabled {
            if let Poll::Ready(Ok(())) = &result {
                let chunk = buf.filled().get(before..).unwrap_or_default();
                trace!(
                    direction = "inbound",
                    bytes = chunk.len(),
                    "Read {} bytes: {}",
                    chunk.len(),
                    String::from_utf8_lossy(chunk)
                );
            }
        }

        result
    }
}

/// Writer that logs every chunk it accepts when enabled
///
/// Bytes and counts are passed through untouched.
#[derive(Debug)]
pub struct TraceWriter<W> {
    inner: W,
    enabled: bool,
}

impl<W> TraceWriter<W> {
    pub fn new(inner: W, enabled: bool) -> Self {
        Self { inner, enabled }
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for TraceWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let result = Pin::new(&mut this.inner).poll_write(cx, buf);

        if this.enabled {
            if let Poll::Ready(Ok(written)) = &result {
                let chunk = buf.get(..*written).unwrap_or(buf);
                trace!(
                    direction = "outbound",
                    bytes = *written,
                    "Write {} bytes: {}",
                    written,
                    String::from_utf8_lossy(chunk)
                );
            }
        }

        result
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Build the duplex stream for a child's stdio pipes
pub fn child_duplex(stdin: ChildStdin, stdout: ChildStdout, trace_io: bool) -> ChildDuplex {
    PipeDuplex::new(
        TraceReader::new(stdout, trace_io),
        TraceWriter::new(stdin, trace_io),
    )
}

// ============================================================================
// Tests
// ============================================================================
