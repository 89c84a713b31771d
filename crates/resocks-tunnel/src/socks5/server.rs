//! Serves SOCKS5 CONNECT requests arriving as tunnel streams.

use std::io::ErrorKind;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use super::Socks5Error;
use super::handshake::{
    self, CMD_CONNECT, REPLY_ADDRESS_TYPE_NOT_SUPPORTED, REPLY_COMMAND_NOT_SUPPORTED,
    REPLY_CONNECTION_NOT_ALLOWED, REPLY_CONNECTION_REFUSED, REPLY_GENERAL_FAILURE,
    REPLY_HOST_UNREACHABLE, REPLY_NETWORK_UNREACHABLE, REPLY_SUCCEEDED, REPLY_TTL_EXPIRED,
    TargetAddr, send_reply, send_reply_unspecified,
};
use crate::control::{ControlLogger, SOCKS_LOG_PREFIX};
use crate::error::TunnelError;
use crate::session::TunnelSession;

/// SOCKS5 server whose listener is a tunnel session.
///
/// Failed requests are reported through the [`ControlLogger`].
#[derive(Debug, Clone)]
pub struct Socks5Server {
    log: ControlLogger,
}

impl Socks5Server {
    pub fn new(log: ControlLogger) -> Self {
        Self { log }
    }

    /// Handle every stream the peer opens until the session closes.
    pub async fn serve(&self, session: &TunnelSession) -> Result<(), TunnelError> {
        loop {
            let stream = match session.accept().await {
                Ok(stream) => stream,
                Err(TunnelError::SessionClosed) => return Ok(()),
                Err(e) => return Err(e),
            };

            let log = self.log.clone();
            tokio::spawn(async move {
                handle_conn(stream, log).await;
            });
        }
    }
}

/// Serve a single SOCKS5 connection.
///
/// The stream is always shut down before it is dropped, so the proxy sees
/// an end of stream instead of a reset.
pub(crate) async fn handle_conn<S>(mut stream: S, log: ControlLogger)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match establish(&mut stream).await {
        Ok(mut outbound) => {
            match tokio::io::copy_bidirectional(&mut stream, &mut outbound).await {
                Ok((sent, received)) => debug!(sent, received, "SOCKS5 connection finished"),
                Err(e) => debug!(error = %e, "SOCKS5 connection ended with error"),
            }
        }
        Err(e) => log.log(&format!("{SOCKS_LOG_PREFIX}Failed to handle request: {e}")),
    }

    let _ = stream.shutdown().await;
}

/// Negotiate, parse the request and connect to the target.
async fn establish<S>(stream: &mut S) -> Result<TcpStream, Socks5Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    handshake::negotiate_method(stream).await?;

    let request = match handshake::read_request(stream).await {
        Ok(request) => request,
        Err(Socks5Error::UnsupportedAddressType(atyp)) => {
            let _ = send_reply_unspecified(stream, REPLY_ADDRESS_TYPE_NOT_SUPPORTED).await;
            return Err(Socks5Error::UnsupportedAddressType(atyp));
        }
        Err(e) => return Err(e),
    };

    if request.command != CMD_CONNECT {
        let _ = send_reply_unspecified(stream, REPLY_COMMAND_NOT_SUPPORTED).await;
        return Err(Socks5Error::UnsupportedCommand(request.command));
    }

    debug!(target = %request.target, "CONNECT");

    let outbound = match connect(&request.target).await {
        Ok(outbound) => outbound,
        Err(source) => {
            let _ = send_reply_unspecified(stream, reply_code_for_connect_error(&source)).await;
            return Err(Socks5Error::Connect {
                target: request.target,
                source,
            });
        }
    };

    let bind_addr = outbound
        .local_addr()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0u16)));
    send_reply(stream, REPLY_SUCCEEDED, bind_addr).await?;

    Ok(outbound)
}

async fn connect(target: &TargetAddr) -> std::io::Result<TcpStream> {
    let stream = match target {
        TargetAddr::Ip(addr) => TcpStream::connect(addr).await?,
        TargetAddr::Domain(host, port) => TcpStream::connect((host.as_str(), *port)).await?,
    };
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

fn reply_code_for_connect_error(error: &std::io::Error) -> u8 {
    match error.kind() {
        ErrorKind::ConnectionRefused => REPLY_CONNECTION_REFUSED,
        ErrorKind::NetworkUnreachable => REPLY_NETWORK_UNREACHABLE,
        ErrorKind::HostUnreachable | ErrorKind::AddrNotAvailable => REPLY_HOST_UNREACHABLE,
        ErrorKind::PermissionDenied => REPLY_CONNECTION_NOT_ALLOWED,
        ErrorKind::TimedOut => REPLY_TTL_EXPIRED,
        _ => REPLY_GENERAL_FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadBuf, duplex};
    use tokio::net::TcpListener;

    use super::*;
    use crate::event::{Event, EventKind, EventSink};

    /// Duplex end that records whether it was shut down.
    struct TrackShutdown {
        inner: DuplexStream,
        shut_down: Arc<AtomicBool>,
    }

    impl AsyncRead for TrackShutdown {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.inner).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for TrackShutdown {
        fn poll_write(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Pin::new(&mut self.inner).poll_write(cx, buf)
        }

        fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.inner).poll_flush(cx)
        }

        fn poll_shutdown(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            self.shut_down.store(true, Ordering::SeqCst);
            Pin::new(&mut self.inner).poll_shutdown(cx)
        }
    }

    fn tracked(inner: DuplexStream) -> (TrackShutdown, Arc<AtomicBool>) {
        let shut_down = Arc::new(AtomicBool::new(false));
        (
            TrackShutdown {
                inner,
                shut_down: shut_down.clone(),
            },
            shut_down,
        )
    }

    fn logger() -> (ControlLogger, Arc<Mutex<Vec<Event>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = seen.clone();
            EventSink::new(move |e| seen.lock().unwrap().push(e))
        };
        let (log, _rx) = ControlLogger::new(sink);
        (log, seen)
    }

    #[tokio::test]
    async fn connects_and_relays() {
        let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target_addr = target.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut conn, _) = target.accept().await.unwrap();
            let mut buf = [0u8; 4];
            conn.read_exact(&mut buf).await.unwrap();
            conn.write_all(b"pong").await.unwrap();
        });

        let (log, seen) = logger();
        let (mut client, server) = duplex(1024);
        tokio::spawn(handle_conn(server, log));

        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut method = [0u8; 2];
        client.read_exact(&mut method).await.unwrap();
        assert_eq!(method, [0x05, 0x00]);

        let mut request = vec![0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1];
        request.extend_from_slice(&target_addr.port().to_be_bytes());
        client.write_all(&request).await.unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], REPLY_SUCCEEDED);

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf, b"pong");
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn refused_target_is_reported() {
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = closed.local_addr().unwrap().port();
        drop(closed);

        let (log, seen) = logger();
        let (mut client, server) = duplex(1024);
        let (server, shut_down) = tracked(server);
        let handle = tokio::spawn(handle_conn(server, log));

        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut method = [0u8; 2];
        client.read_exact(&mut method).await.unwrap();

        let mut request = vec![0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1];
        request.extend_from_slice(&port.to_be_bytes());
        client.write_all(&request).await.unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], REPLY_CONNECTION_REFUSED);

        handle.await.unwrap();
        assert!(
            shut_down.load(Ordering::SeqCst),
            "failed request must shut the stream down"
        );
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind, EventKind::Error);
        assert!(seen[0].data.starts_with("socks: Failed to handle request: connect to"));
    }

    #[tokio::test]
    async fn bind_is_not_supported() {
        let (log, seen) = logger();
        let (mut client, server) = duplex(1024);
        let (server, shut_down) = tracked(server);
        let handle = tokio::spawn(handle_conn(server, log));

        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut method = [0u8; 2];
        client.read_exact(&mut method).await.unwrap();

        client
            .write_all(&[0x05, 0x02, 0x00, 0x01, 127, 0, 0, 1, 0, 80])
            .await
            .unwrap();
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], REPLY_COMMAND_NOT_SUPPORTED);

        handle.await.unwrap();
        assert!(shut_down.load(Ordering::SeqCst));
        assert_eq!(seen.lock().unwrap().len(), 1);

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }
}
