//! Listener side: accepts the relay and exposes its SOCKS5 server locally.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::addr::{PeerIp, format_peer_ip};
use crate::control::read_control;
use crate::defaults::DEFAULT_TLS_HANDSHAKE_TIMEOUT;
use crate::error::TunnelError;
use crate::event::{EventKind, EventSink};
use crate::io::pipe;
use crate::session::TunnelSession;

/// Settings of a [`ProxyListener`].
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Public address relays connect to.
    pub listen_addr: String,
    /// Local address of the SOCKS5 forwarding listener.
    pub forward_addr: String,
    /// Stop after the first relay disconnects.
    pub abort_on_disconnect: bool,
    pub tls: Arc<rustls::ServerConfig>,
}

/// Serve one relay over an established connection.
///
/// Emits `relay-connected` first and `relay-disconnected` last; the returned
/// error, if any, is also the disconnect reason.
pub async fn run_proxy<C>(
    conn: C,
    forward_addr: &str,
    events: &EventSink,
    shutdown: &CancellationToken,
) -> Result<(), TunnelError>
where
    C: AsyncRead + AsyncWrite + PeerIp + Unpin + Send + 'static,
{
    events.emit(EventKind::RelayConnected, format_peer_ip(&conn));
    let result = serve_relay(conn, forward_addr, events, shutdown).await;
    report_disconnect(events, &result);
    result
}

fn report_disconnect(events: &EventSink, result: &Result<(), TunnelError>) {
    let reason = match result {
        Ok(()) => String::new(),
        Err(e) => e.to_string(),
    };
    events.emit(EventKind::RelayDisconnected, reason);
}

async fn serve_relay<C>(
    conn: C,
    forward_addr: &str,
    events: &EventSink,
    shutdown: &CancellationToken,
) -> Result<(), TunnelError>
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let session = TunnelSession::open_side(conn);

    let result = async {
        // The control stream must be the first stream of the session.
        let control = session.open().await.map_err(|e| match e {
            TunnelError::SessionClosed => TunnelError::InvalidConnectionKey,
            other => other,
        })?;
        tokio::spawn(read_control(control, session.clone(), events.clone()));

        forward(&session, forward_addr, events, shutdown).await
    }
    .await;

    session.close();
    result
}

/// Run the local forwarding listener for the lifetime of `session`.
async fn forward(
    session: &TunnelSession,
    forward_addr: &str,
    events: &EventSink,
    shutdown: &CancellationToken,
) -> Result<(), TunnelError> {
    let listener = TcpListener::bind(forward_addr)
        .await
        .map_err(|source| TunnelError::Listen {
            addr: forward_addr.to_string(),
            source,
        })?;
    let local_addr = listener.local_addr()?;

    info!(address = %local_addr, "SOCKS5 forwarding listener active");
    events.emit(EventKind::ForwardingActive, local_addr.to_string());

    let tracker = TaskTracker::new();
    let result = loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break Ok(()),
            _ = session.closed() => break Ok(()),

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    events.emit(EventKind::ConnectionOpened, peer.ip().to_string());
                    tracker.spawn(forward_conn(stream, peer, session.clone(), events.clone()));
                }
                Err(_) if session.is_closed() => break Ok(()),
                Err(e) => break Err(TunnelError::Accept(e)),
            },
        }
    };

    drop(listener);
    session.close();
    tracker.close();
    tracker.wait().await;

    info!(address = %local_addr, "SOCKS5 forwarding listener inactive");
    events.emit(EventKind::ForwardingInactive, "");
    result
}

async fn forward_conn(
    stream: TcpStream,
    peer: SocketAddr,
    session: TunnelSession,
    events: EventSink,
) {
    let _ = stream.set_nodelay(true);

    let result = async {
        let tunnel = session.open().await?;
        pipe(stream, tunnel).await
    }
    .await;

    match result {
        Ok(stats) => debug!(
            peer = %peer,
            sent = stats.proxy_to_relay,
            received = stats.relay_to_proxy,
            "forwarded connection closed"
        ),
        Err(e) if session.is_closed() => {
            debug!(peer = %peer, error = %e, "forwarded connection ended with session")
        }
        Err(e) => events.emit(
            EventKind::Error,
            format!("handling forwarded connection: {e}"),
        ),
    }

    events.emit(EventKind::ConnectionClosed, peer.ip().to_string());
}

/// Public TLS listener that serves one relay at a time.
pub struct ProxyListener {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    forward_addr: String,
    abort_on_disconnect: bool,
    handshake_timeout: Duration,
}

impl ProxyListener {
    pub async fn bind(config: ListenerConfig) -> Result<Self, TunnelError> {
        let listener = TcpListener::bind(&config.listen_addr)
            .await
            .map_err(|source| TunnelError::Listen {
                addr: config.listen_addr.clone(),
                source,
            })?;
        info!(address = %listener.local_addr()?, "listening for relay connections");

        Ok(Self {
            listener,
            acceptor: TlsAcceptor::from(config.tls),
            forward_addr: config.forward_addr,
            abort_on_disconnect: config.abort_on_disconnect,
            handshake_timeout: DEFAULT_TLS_HANDSHAKE_TIMEOUT,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TunnelError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept relays one after another until shutdown, or until the first
    /// one disconnects when configured to abort. The public socket is closed
    /// when this returns.
    pub async fn run(
        self,
        events: &EventSink,
        shutdown: &CancellationToken,
    ) -> Result<(), TunnelError> {
        loop {
            let (tcp, peer) = tokio::select! {
                biased;

                _ = shutdown.cancelled() => return Ok(()),
                accepted = self.listener.accept() => accepted.map_err(TunnelError::Accept)?,
            };

            info!(peer = %peer, "relay connected");
            events.emit(EventKind::RelayConnected, peer.ip().to_string());

            let result = match self.handshake(tcp, shutdown).await {
                Ok(Some(tls)) => serve_relay(tls, &self.forward_addr, events, shutdown).await,
                Ok(None) => Ok(()),
                Err(e) => {
                    warn!(peer = %peer, error = %e, "TLS handshake failed");
                    Err(e)
                }
            };

            info!(peer = %peer, "relay disconnected");
            report_disconnect(events, &result);

            if self.abort_on_disconnect || shutdown.is_cancelled() {
                return Ok(());
            }
        }
    }

    async fn handshake(
        &self,
        tcp: TcpStream,
        shutdown: &CancellationToken,
    ) -> Result<Option<tokio_rustls::server::TlsStream<TcpStream>>, TunnelError> {
        let _ = tcp.set_nodelay(true);

        tokio::select! {
            _ = shutdown.cancelled() => Ok(None),
            result = tokio::time::timeout(self.handshake_timeout, self.acceptor.accept(tcp)) => match result {
                Ok(Ok(tls)) => Ok(Some(tls)),
                Ok(Err(e)) => Err(TunnelError::from_handshake(e)),
                Err(_) => Err(TunnelError::HandshakeTimeout),
            },
        }
    }
}
