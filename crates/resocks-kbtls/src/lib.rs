//! Key-based mutual TLS.
//!
//! Both ends of a tunnel derive the same certificate authority from a shared
//! 32-byte [`ConnectionKey`]. Each side then issues itself a short-lived leaf
//! certificate and trusts nothing but that CA, so a handshake only succeeds
//! between peers holding the same key.

mod ca;
mod config;
mod error;
mod key;
mod verifier;

pub use ca::{IssuedCert, KeyedCa, LeafRole};
pub use config::{
    KeyedClientConfig, client_config, client_config_for_client_name, insecure_client_config,
    insecure_server_config, server_config, server_config_for_hostname,
};
pub use error::KbtlsError;
pub use key::{ConnectionKey, KEY_LEN};
