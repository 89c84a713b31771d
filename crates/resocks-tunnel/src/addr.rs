//! Peer address lookup for the transports a tunnel can run over.

use std::net::IpAddr;

use tokio::io::DuplexStream;
use tokio::net::TcpStream;

/// Remote IP of a connection, when the transport has one.
pub trait PeerIp {
    fn peer_ip(&self) -> Option<IpAddr>;
}

impl PeerIp for TcpStream {
    fn peer_ip(&self) -> Option<IpAddr> {
        self.peer_addr().ok().map(|addr| addr.ip())
    }
}

impl<S: PeerIp> PeerIp for tokio_rustls::server::TlsStream<S> {
    fn peer_ip(&self) -> Option<IpAddr> {
        self.get_ref().0.peer_ip()
    }
}

impl<S: PeerIp> PeerIp for tokio_rustls::client::TlsStream<S> {
    fn peer_ip(&self) -> Option<IpAddr> {
        self.get_ref().0.peer_ip()
    }
}

/// In-memory pipes have no address.
impl PeerIp for DuplexStream {
    fn peer_ip(&self) -> Option<IpAddr> {
        None
    }
}

/// Peer IP as text, `unknown` when there is none.
pub fn format_peer_ip(conn: &impl PeerIp) -> String {
    conn.peer_ip()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
