//! Tunnel error types.

use std::io;
use std::time::Duration;

use rustls::AlertDescription;

use crate::socks5::Socks5Error;

/// Errors of tunnel sessions and both coordinators.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("invalid connection key")]
    InvalidConnectionKey,

    #[error("session closed")]
    SessionClosed,

    #[error("session closed before the control stream was opened")]
    NoControlStream,

    #[error("multiplexer: {0}")]
    Mux(String),

    #[error("listen on {addr}: {source}")]
    Listen {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("accept connection: {0}")]
    Accept(#[source] io::Error),

    #[error("dial {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("dial {addr}: timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error("TLS handshake timed out")]
    HandshakeTimeout,

    #[error("{direction}: {source}")]
    Copy {
        direction: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("control message of {0} bytes exceeds the limit of {max} bytes", max = crate::defaults::MAX_CONTROL_FRAME_LEN)]
    FrameTooLarge(usize),

    #[error("socks5: {0}")]
    Socks5(#[from] Socks5Error),
}

impl TunnelError {
    /// Classify a failed TLS handshake.
    ///
    /// Certificate rejections on either side mean the peers do not share a
    /// connection key.
    pub(crate) fn from_handshake(err: io::Error) -> Self {
        if is_key_mismatch(&err) {
            TunnelError::InvalidConnectionKey
        } else {
            TunnelError::Io(err)
        }
    }
}

/// Whether an I/O error wraps a TLS certificate rejection.
pub(crate) fn is_key_mismatch(err: &io::Error) -> bool {
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        .is_some_and(is_certificate_rejection)
}

fn is_certificate_rejection(err: &rustls::Error) -> bool {
    matches!(
        err,
        rustls::Error::InvalidCertificate(_)
            | rustls::Error::NoCertificatesPresented
            | rustls::Error::AlertReceived(
                AlertDescription::BadCertificate
                    | AlertDescription::UnknownCA
                    | AlertDescription::CertificateUnknown
                    | AlertDescription::DecryptError
                    | AlertDescription::CertificateRequired
            )
    )
}
