//! # resocks
//!
//! Reverse SOCKS5 proxy. A relay inside a restricted network dials out to a
//! listener over mutually authenticated TLS; the listener then serves SOCKS5
//! locally and every connection exits through the relay.
//!
//! ## Crates
//!
//! - [`resocks_kbtls`] - Connection keys and key-derived TLS configuration
//! - [`resocks_tunnel`] - Multiplexed session, control channel, proxy and relay

pub mod cli;
pub mod config;

pub use resocks_kbtls as kbtls;
pub use resocks_tunnel as tunnel;
