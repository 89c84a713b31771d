//! Minimal SOCKS5 server (RFC 1928) run on the relay side of the tunnel.
//!
//! Only the no-authentication method and the CONNECT command are supported.

mod handshake;
mod server;

pub use handshake::TargetAddr;
pub use server::Socks5Server;

/// SOCKS5 protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum Socks5Error {
    #[error("unsupported SOCKS version: {0:#04x}")]
    InvalidVersion(u8),
    #[error("no acceptable authentication methods")]
    NoAcceptableMethods,
    #[error("unsupported command: {0:#04x}")]
    UnsupportedCommand(u8),
    #[error("unsupported address type: {0:#04x}")]
    UnsupportedAddressType(u8),
    #[error("invalid domain name")]
    InvalidDomain,
    #[error("connect to {target}: {source}")]
    Connect {
        target: TargetAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
