use core::pin::Pin;
use core::task::{Context, Poll};
use std::io;

use libp2p::{Stream as P2pStream, StreamProtocol};
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, BufStream, ReadBuf};
use tokio_util::compat::{Compat, FuturesAsyncReadCompatExt};

/// Metadata synchronization streams: one newline-terminated JSON store each
/// way.
pub const METADATA_PROTOCOL: StreamProtocol = StreamProtocol::new("/metadata/1");

/// File transfer streams: request line plus encryption flag, answered with
/// length-prefixed file frames.
pub const TRANSFER_PROTOCOL: StreamProtocol = StreamProtocol::new("/transfer/1");

/// A protocol stream adapted to tokio I/O, buffered in both directions.
///
/// Framing is left to the protocol layer on top; this type only guarantees
/// ordered, reliable bytes. Dropping the stream releases it; writers should
/// flush (or shut down) before dropping.
#[derive(Debug)]
pub struct Stream {
    inner: BufStream<Compat<P2pStream>>,
}

impl Stream {
    #[must_use]
    pub fn new(stream: P2pStream) -> Self {
        Self {
            inner: BufStream::new(stream.compat()),
        }
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl AsyncBufRead for Stream {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<&[u8]>> {
        Pin::new(&mut self.get_mut().inner).poll_fill_buf(cx)
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        Pin::new(&mut self.get_mut().inner).consume(amt);
    }
}

impl AsyncWrite for Stream {
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
