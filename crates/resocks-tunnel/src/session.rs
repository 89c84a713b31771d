//! Stream multiplexer over a single tunnel connection.

use std::io;
use std::sync::{Arc, OnceLock};

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_yamux::session::SessionType;
use tokio_yamux::{Config, Control, Session};
use tracing::debug;

use crate::error::{TunnelError, is_key_mismatch};

pub use tokio_yamux::StreamHandle;

/// Which end of the tunnel a session runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionRole {
    /// Proxy side: opens streams.
    Initiator,
    /// Relay side: accepts streams.
    Acceptor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Requested,
    Finished,
    InvalidKey,
    Failed,
}

struct Inner {
    role: SessionRole,
    control: Control,
    incoming: Mutex<mpsc::UnboundedReceiver<StreamHandle>>,
    closed: CancellationToken,
    reason: OnceLock<CloseReason>,
}

/// Handle to a multiplexed session. Clones share the same session.
///
/// A background task drives the multiplexer. When it stops, either because
/// [`close`](Self::close) was called or the connection ended, the connection
/// is dropped and every stream, pending [`open`](Self::open) and pending
/// [`accept`](Self::accept) fails promptly.
#[derive(Clone)]
pub struct TunnelSession {
    inner: Arc<Inner>,
}

impl TunnelSession {
    /// Start the initiating (proxy) side of a session over `conn`.
    pub fn open_side<C>(conn: C) -> Self
    where
        C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::start(conn, SessionRole::Initiator)
    }

    /// Start the accepting (relay) side of a session over `conn`.
    pub fn accept_side<C>(conn: C) -> Self
    where
        C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::start(conn, SessionRole::Acceptor)
    }

    fn start<C>(conn: C, role: SessionRole) -> Self
    where
        C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let ty = match role {
            SessionRole::Initiator => SessionType::Client,
            SessionRole::Acceptor => SessionType::Server,
        };
        let session = Session::new(conn, Config::default(), ty);
        let (tx, rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            role,
            control: session.control(),
            incoming: Mutex::new(rx),
            closed: CancellationToken::new(),
            reason: OnceLock::new(),
        });

        tokio::spawn(drive(session, tx, inner.clone()));
        Self { inner }
    }

    /// Open a new stream to the peer.
    pub async fn open(&self) -> Result<StreamHandle, TunnelError> {
        if self.is_closed() {
            return Err(self.closed_error());
        }

        let mut control = self.inner.control.clone();
        tokio::select! {
            result = control.open_stream() => result.map_err(|e| {
                if self.is_closed() {
                    self.closed_error()
                } else {
                    TunnelError::Mux(format!("open stream: {e:?}"))
                }
            }),
            _ = self.inner.closed.cancelled() => Err(self.closed_error()),
        }
    }

    /// Wait for the next stream opened by the peer.
    pub async fn accept(&self) -> Result<StreamHandle, TunnelError> {
        let mut incoming = self.inner.incoming.lock().await;
        match incoming.recv().await {
            Some(stream) => Ok(stream),
            None => Err(self.closed_error()),
        }
    }

    /// Close the session and its connection. Idempotent.
    pub fn close(&self) {
        let _ = self.inner.reason.set(CloseReason::Requested);
        self.inner.closed.cancel();
    }

    /// Resolves once the session is closed.
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Error describing why the session is gone.
    fn closed_error(&self) -> TunnelError {
        match self.inner.reason.get() {
            Some(CloseReason::InvalidKey) => TunnelError::InvalidConnectionKey,
            _ => TunnelError::SessionClosed,
        }
    }
}

impl std::fmt::Debug for TunnelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelSession")
            .field("role", &self.inner.role)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn drive<C>(
    mut session: Session<C>,
    incoming: mpsc::UnboundedSender<StreamHandle>,
    inner: Arc<Inner>,
) where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let reason = loop {
        tokio::select! {
            _ = inner.closed.cancelled() => break CloseReason::Requested,
            next = session.next() => match next {
                Some(Ok(stream)) => match inner.role {
                    SessionRole::Acceptor => {
                        // Receiver only goes away together with the session.
                        let _ = incoming.send(stream);
                    }
                    SessionRole::Initiator => debug!("dropping stream opened by the relay"),
                },
                Some(Err(e)) => break classify(&e),
                None => break CloseReason::Finished,
            },
        }
    };

    let _ = inner.reason.set(reason);
    inner.closed.cancel();
    drop(session);
    debug!(role = ?inner.role, reason = ?reason, "session closed");
}

fn classify(err: &io::Error) -> CloseReason {
    if is_key_mismatch(err) {
        CloseReason::InvalidKey
    } else {
        debug!(error = %err, "session failed");
        CloseReason::Failed
    }
}
