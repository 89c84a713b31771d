//! Reverse SOCKS5 tunnel.
//!
//! A relay dials out to a listener and the two ends run a multiplexed
//! session over that single connection:
//! - the proxy (listener) side opens one control stream, then one stream per
//!   client accepted on its local SOCKS5 forwarding listener
//! - the relay side accepts the control stream, then serves SOCKS5 on every
//!   further stream and reports failures back over the control stream

pub mod addr;
pub mod control;
pub mod defaults;
pub mod error;
pub mod event;
pub mod io;
pub mod proxy;
pub mod relay;
pub mod session;
pub mod socks5;

pub use addr::PeerIp;
pub use error::TunnelError;
pub use event::{Event, EventKind, EventSink};
pub use proxy::{ListenerConfig, ProxyListener, run_proxy};
pub use relay::{RelayConfig, RelayConnector, run_relay};
pub use session::TunnelSession;
