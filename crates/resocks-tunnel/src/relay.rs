//! Relay side: dials the listener and serves SOCKS5 over the tunnel.

use std::time::Duration;

use resocks_kbtls::KeyedClientConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::control::{ControlLogger, write_control_log};
use crate::error::TunnelError;
use crate::event::{EventKind, EventSink};
use crate::session::TunnelSession;
use crate::socks5::Socks5Server;

/// Settings of a [`RelayConnector`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listener address to dial, `host:port`.
    pub target: String,
    pub tls: KeyedClientConfig,
    /// Bound on TCP connect plus TLS handshake.
    pub timeout: Duration,
    /// Delay before reconnecting; zero disables reconnecting.
    pub reconnect_after: Duration,
}

/// Serve the relay side of a tunnel over an established connection.
///
/// Returns `Ok` once the session closes; fails if the session cannot be set
/// up or the SOCKS5 server stops with an error.
pub async fn run_relay<C>(
    conn: C,
    events: &EventSink,
    shutdown: &CancellationToken,
) -> Result<(), TunnelError>
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let session = TunnelSession::accept_side(conn);

    let result = tokio::select! {
        result = serve_session(&session, events) => result,
        _ = shutdown.cancelled() => Ok(()),
    };

    session.close();
    result
}

async fn serve_session(session: &TunnelSession, events: &EventSink) -> Result<(), TunnelError> {
    // The first stream is the control stream.
    let control = session.accept().await.map_err(|e| match e {
        TunnelError::SessionClosed => TunnelError::NoControlStream,
        other => other,
    })?;

    let (log, log_rx) = ControlLogger::new(events.clone());
    tokio::spawn(write_control_log(control, log_rx));

    Socks5Server::new(log).serve(session).await
}

/// Dials the listener and runs the relay, reconnecting when configured to.
pub struct RelayConnector {
    config: RelayConfig,
    connector: TlsConnector,
}

impl RelayConnector {
    pub fn new(config: RelayConfig) -> Self {
        let connector = TlsConnector::from(config.tls.config.clone());
        Self { config, connector }
    }

    /// Connect to the listener within the configured timeout.
    pub async fn connect(&self) -> Result<TlsStream<TcpStream>, TunnelError> {
        let target = &self.config.target;

        let dial = async {
            let tcp = TcpStream::connect(target)
                .await
                .map_err(|source| TunnelError::Dial {
                    addr: target.clone(),
                    source,
                })?;
            let _ = tcp.set_nodelay(true);

            self.connector
                .connect(self.config.tls.server_name.clone(), tcp)
                .await
                .map_err(TunnelError::from_handshake)
        };

        tokio::time::timeout(self.config.timeout, dial)
            .await
            .map_err(|_| TunnelError::ConnectTimeout {
                addr: target.clone(),
                timeout: self.config.timeout,
            })?
    }

    /// Dial and relay once, or forever with a fixed delay between attempts.
    ///
    /// In single-shot mode the attempt's error is returned. With reconnects,
    /// errors are reported as events and only shutdown ends the loop.
    pub async fn run(
        &self,
        events: &EventSink,
        shutdown: &CancellationToken,
    ) -> Result<(), TunnelError> {
        let reconnect_after = self.config.reconnect_after;

        loop {
            let result = tokio::select! {
                biased;

                _ = shutdown.cancelled() => return Ok(()),
                connected = self.connect() => connected,
            };

            let result = match result {
                Ok(tls) => {
                    let peer = tls.get_ref().0.peer_addr().ok();
                    info!(target = %self.config.target, peer = ?peer, "connected to listener");
                    run_relay(tls, events, shutdown).await
                }
                Err(e) => Err(e),
            };

            if shutdown.is_cancelled() {
                return result;
            }
            if reconnect_after.is_zero() {
                return result;
            }

            if let Err(e) = &result {
                warn!(error = %e, "relay attempt failed");
                events.emit(EventKind::Error, e.to_string());
            }

            info!(delay = ?reconnect_after, "reconnecting");
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(reconnect_after) => {}
            }
        }
    }
}
