//! Control channel: length-prefixed error messages from relay to proxy.
//!
//! Each frame is a big-endian `u32` length followed by that many bytes of
//! UTF-8 text. The relay only writes, the proxy only reads.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::debug;

use crate::defaults::MAX_CONTROL_FRAME_LEN;
use crate::error::TunnelError;
use crate::event::{EventKind, EventSink};
use crate::session::TunnelSession;

/// Prefix of SOCKS server log lines, not sent over the wire.
pub const SOCKS_LOG_PREFIX: &str = "[ERR] socks: ";

/// Write one control frame.
pub async fn write_frame<W>(writer: &mut W, msg: &[u8]) -> Result<(), TunnelError>
where
    W: AsyncWrite + Unpin,
{
    if msg.len() > MAX_CONTROL_FRAME_LEN {
        return Err(TunnelError::FrameTooLarge(msg.len()));
    }

    let mut buf = BytesMut::with_capacity(4 + msg.len());
    buf.put_u32(msg.len() as u32);
    buf.put_slice(msg);

    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one control frame. `None` on EOF at a frame boundary.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<String>, TunnelError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
        filled += n;
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_CONTROL_FRAME_LEN {
        return Err(TunnelError::FrameTooLarge(len));
    }

    let mut msg = vec![0u8; len];
    reader.read_exact(&mut msg).await?;
    Ok(Some(String::from_utf8_lossy(&msg).into_owned()))
}

/// Turn every control frame into an error event until the stream ends.
///
/// A read failure is reported once, unless the session is already closed
/// and the failure is just teardown.
pub async fn read_control<R>(mut reader: R, session: TunnelSession, events: EventSink)
where
    R: AsyncRead + Unpin,
{
    loop {
        match read_frame(&mut reader).await {
            Ok(Some(msg)) => events.emit(EventKind::Error, msg),
            Ok(None) => break,
            Err(e) if session.is_closed() => {
                debug!(error = %e, "control channel closed with session");
                break;
            }
            Err(e) => {
                events.emit(EventKind::Error, format!("read control message: {e}"));
                break;
            }
        }
    }
    debug!("control reader stopped");
}

/// Sends SOCKS server log lines to the proxy and reports them locally.
#[derive(Debug, Clone)]
pub struct ControlLogger {
    tx: mpsc::UnboundedSender<String>,
    events: EventSink,
}

impl ControlLogger {
    /// Create a logger and the receiving end for [`write_control_log`].
    pub fn new(events: EventSink) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, events }, rx)
    }

    pub fn log(&self, line: &str) {
        let line = line.trim_matches('\n');
        let msg = line.strip_prefix(SOCKS_LOG_PREFIX).unwrap_or(line);

        self.events.emit(EventKind::Error, format!("socks: {msg}"));

        if self.tx.send(msg.to_string()).is_err() {
            debug!("control channel gone, message not forwarded");
        }
    }
}

/// Write queued log lines as control frames until the queue or the stream
/// closes.
pub async fn write_control_log<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, msg.as_bytes()).await {
            debug!(error = %e, "control write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}
