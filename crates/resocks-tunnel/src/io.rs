//! Bidirectional byte pipe between a local connection and a tunnel stream.
//!
//! Both directions are driven as poll-based state machines inside a single
//! future, so back-pressure on one direction never stalls the other.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::defaults::DEFAULT_PIPE_BUFFER_SIZE;
use crate::error::TunnelError;

const PROXY_TO_RELAY: &str = "proxy->relay";
const RELAY_TO_PROXY: &str = "relay->proxy";

/// Bytes moved by a finished [`pipe`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipeStats {
    pub proxy_to_relay: u64,
    pub relay_to_proxy: u64,
}

enum CopyState {
    Reading,
    Writing(usize, usize), // (pos, len)
    Flushing,
    ShuttingDown,
    Done,
}

/// One copy direction with its buffer and progress.
struct Direction {
    name: &'static str,
    buf: Box<[u8]>,
    state: CopyState,
    transferred: u64,
}

impl Direction {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            buf: vec![0u8; DEFAULT_PIPE_BUFFER_SIZE].into_boxed_slice(),
            state: CopyState::Reading,
            transferred: 0,
        }
    }

    /// Copy until the reader hits EOF and the writer is shut down.
    fn poll_copy<R, W>(
        &mut self,
        cx: &mut Context<'_>,
        reader: &mut R,
        writer: &mut W,
    ) -> Poll<io::Result<()>>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        loop {
            match &mut self.state {
                CopyState::Reading => {
                    let mut read_buf = ReadBuf::new(&mut self.buf);
                    match Pin::new(&mut *reader).poll_read(cx, &mut read_buf) {
                        Poll::Ready(Ok(())) => {
                            let n = read_buf.filled().len();
                            self.state = if n == 0 {
                                CopyState::ShuttingDown
                            } else {
                                CopyState::Writing(0, n)
                            };
                        }
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Pending => return Poll::Pending,
                    }
                }
                CopyState::Writing(pos, len) => {
                    match Pin::new(&mut *writer).poll_write(cx, &self.buf[*pos..*len]) {
                        Poll::Ready(Ok(0)) => {
                            return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
                        }
                        Poll::Ready(Ok(n)) => {
                            *pos += n;
                            self.transferred += n as u64;
                            if *pos >= *len {
                                self.state = CopyState::Flushing;
                            }
                        }
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Pending => return Poll::Pending,
                    }
                }
                CopyState::Flushing => match Pin::new(&mut *writer).poll_flush(cx) {
                    Poll::Ready(Ok(())) => self.state = CopyState::Reading,
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                },
                CopyState::ShuttingDown => match Pin::new(&mut *writer).poll_shutdown(cx) {
                    Poll::Ready(_) => self.state = CopyState::Done,
                    Poll::Pending => return Poll::Pending,
                },
                CopyState::Done => return Poll::Ready(Ok(())),
            }
        }
    }
}

/// Pipe bytes between `local` and `tunnel` in both directions.
///
/// Returns as soon as either direction has finished or failed. Both streams
/// are dropped on return, which closes the other direction as well.
pub async fn pipe<L, T>(local: L, tunnel: T) -> Result<PipeStats, TunnelError>
where
    L: AsyncRead + AsyncWrite + Unpin,
    T: AsyncRead + AsyncWrite + Unpin,
{
    let (mut local_r, mut local_w) = tokio::io::split(local);
    let (mut tunnel_r, mut tunnel_w) = tokio::io::split(tunnel);

    let mut up = Direction::new(PROXY_TO_RELAY);
    let mut down = Direction::new(RELAY_TO_PROXY);

    let result = std::future::poll_fn(|cx| {
        if let Poll::Ready(result) = up.poll_copy(cx, &mut local_r, &mut tunnel_w) {
            return Poll::Ready(result.map_err(|source| (up.name, source)));
        }
        if let Poll::Ready(result) = down.poll_copy(cx, &mut tunnel_r, &mut local_w) {
            return Poll::Ready(result.map_err(|source| (down.name, source)));
        }
        Poll::Pending
    })
    .await;

    let stats = PipeStats {
        proxy_to_relay: up.transferred,
        relay_to_proxy: down.transferred,
    };

    match result {
        Ok(()) => Ok(stats),
        Err((direction, source)) => Err(TunnelError::Copy { direction, source }),
    }
}
