//! Error types for key handling and TLS configuration.

use thiserror::Error;

/// Errors that can occur while handling connection keys or building TLS configs.
#[derive(Error, Debug)]
pub enum KbtlsError {
    #[error("connection key is empty")]
    EmptyKey,

    #[error("base64 decode: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("key has {0} bytes instead of {expected}", expected = crate::KEY_LEN)]
    KeyLength(usize),

    #[error("invalid all-zero connection key")]
    ZeroKey,

    #[error("could not generate a valid non-zero connection key in {0} attempts")]
    Exhausted(usize),

    #[error("read random bytes: {0}")]
    Random(#[from] rand::Error),

    #[error("certificate generation failed: {0}")]
    CertGeneration(#[from] rcgen::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("client verifier error: {0}")]
    Verifier(#[from] rustls::server::VerifierBuilderError),

    #[error("invalid server name: {0}")]
    ServerName(#[from] rustls::pki_types::InvalidDnsNameError),

    #[error("invalid certificate name {0:?}")]
    CertificateName(String),
}
