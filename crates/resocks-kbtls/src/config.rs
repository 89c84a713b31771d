//! TLS configurations that trust exactly the CA derived from a connection key.

use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::ServerName;
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tracing::debug;

use crate::ca::{KeyedCa, LeafRole};
use crate::error::KbtlsError;
use crate::key::ConnectionKey;
use crate::verifier::SkipServerVerification;

/// Only TLS 1.3 is ever negotiated.
static PROTOCOL_VERSIONS: &[&rustls::SupportedProtocolVersion] = &[&rustls::version::TLS13];

/// Client configuration plus the server name it expects to see.
#[derive(Debug, Clone)]
pub struct KeyedClientConfig {
    pub config: Arc<ClientConfig>,
    pub server_name: ServerName<'static>,
}

/// Server config whose certificate is named after the key's public key.
///
/// Clients must present a certificate issued by the key's CA.
pub fn server_config(key: &ConnectionKey) -> Result<ServerConfig, KbtlsError> {
    let hostname = key.tls_name()?;
    server_config_for_hostname(key, &hostname)
}

/// Like [`server_config`] but with `hostname` in the server certificate.
pub fn server_config_for_hostname(
    key: &ConnectionKey,
    hostname: &str,
) -> Result<ServerConfig, KbtlsError> {
    let ca = KeyedCa::new(key)?;
    let provider = crypto_provider();

    let verifier =
        WebPkiClientVerifier::builder_with_provider(Arc::new(root_store(&ca)?), provider.clone())
            .build()?;

    let leaf = ca.issue(hostname, LeafRole::Server)?;
    let config = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(PROTOCOL_VERSIONS)?
        .with_client_cert_verifier(verifier)
        .with_single_cert(vec![leaf.cert], leaf.key)?;

    debug!(hostname, "server TLS configured");
    Ok(config)
}

/// Server config that does not ask clients for a certificate.
pub fn insecure_server_config(key: &ConnectionKey) -> Result<ServerConfig, KbtlsError> {
    let ca = KeyedCa::new(key)?;
    let leaf = ca.issue(&key.tls_name()?, LeafRole::Server)?;

    let config = ServerConfig::builder_with_provider(crypto_provider())
        .with_protocol_versions(PROTOCOL_VERSIONS)?
        .with_no_client_auth()
        .with_single_cert(vec![leaf.cert], leaf.key)?;

    debug!("server TLS configured without client authentication");
    Ok(config)
}

/// Client config trusting only the key's CA and presenting a client
/// certificate issued by it.
pub fn client_config(key: &ConnectionKey) -> Result<KeyedClientConfig, KbtlsError> {
    let client_name = key.tls_name()?;
    client_config_for_client_name(key, &client_name)
}

/// Like [`client_config`] with `client_name` in the client certificate.
///
/// The expected server name is still derived from the key.
pub fn client_config_for_client_name(
    key: &ConnectionKey,
    client_name: &str,
) -> Result<KeyedClientConfig, KbtlsError> {
    let ca = KeyedCa::new(key)?;
    let leaf = ca.issue(client_name, LeafRole::Client)?;

    let config = ClientConfig::builder_with_provider(crypto_provider())
        .with_protocol_versions(PROTOCOL_VERSIONS)?
        .with_root_certificates(root_store(&ca)?)
        .with_client_auth_cert(vec![leaf.cert], leaf.key)?;

    Ok(KeyedClientConfig {
        config: Arc::new(config),
        server_name: ServerName::try_from(key.tls_name()?)?,
    })
}

/// Client config that accepts any server certificate.
///
/// With a key, a client certificate from the key's CA is still presented
/// and the key's name is sent as SNI. Without one, `fallback_name` is used.
pub fn insecure_client_config(
    key: Option<&ConnectionKey>,
    fallback_name: &str,
) -> Result<KeyedClientConfig, KbtlsError> {
    let provider = crypto_provider();
    let verifier = Arc::new(SkipServerVerification::new(
        provider.signature_verification_algorithms,
    ));

    let builder = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(PROTOCOL_VERSIONS)?
        .dangerous()
        .with_custom_certificate_verifier(verifier);

    let (config, server_name) = match key {
        Some(key) => {
            let ca = KeyedCa::new(key)?;
            let name = key.tls_name()?;
            let leaf = ca.issue(&name, LeafRole::Client)?;
            let config = builder.with_client_auth_cert(vec![leaf.cert], leaf.key)?;
            (config, ServerName::try_from(name)?)
        }
        None => (
            builder.with_no_client_auth(),
            ServerName::try_from(fallback_name.to_string())?,
        ),
    };

    Ok(KeyedClientConfig {
        config: Arc::new(config),
        server_name,
    })
}

fn root_store(ca: &KeyedCa) -> Result<RootCertStore, KbtlsError> {
    let mut roots = RootCertStore::empty();
    roots.add(ca.der().clone())?;
    Ok(roots)
}

fn crypto_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_key_is_rejected_by_every_builder() {
        let zero = ConnectionKey::default();

        assert!(matches!(server_config(&zero), Err(KbtlsError::ZeroKey)));
        assert!(matches!(
            server_config_for_hostname(&zero, "example.com"),
            Err(KbtlsError::ZeroKey)
        ));
        assert!(matches!(client_config(&zero), Err(KbtlsError::ZeroKey)));
        assert!(matches!(
            client_config_for_client_name(&zero, "client.example"),
            Err(KbtlsError::ZeroKey)
        ));
        assert!(matches!(
            insecure_server_config(&zero),
            Err(KbtlsError::ZeroKey)
        ));
        assert!(matches!(
            insecure_client_config(Some(&zero), "localhost"),
            Err(KbtlsError::ZeroKey)
        ));
    }

    #[test]
    fn client_expects_key_derived_server_name() {
        let key = ConnectionKey::generate().unwrap();
        let cfg = client_config(&key).unwrap();
        let expected = ServerName::try_from(key.tls_name().unwrap()).unwrap();
        assert_eq!(cfg.server_name, expected);
    }

    #[test]
    fn insecure_client_without_key_uses_fallback_name() {
        let cfg = insecure_client_config(None, "127.0.0.1").unwrap();
        assert!(matches!(cfg.server_name, ServerName::IpAddress(_)));
    }
}
