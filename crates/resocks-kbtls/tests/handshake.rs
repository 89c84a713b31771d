//! Handshakes between configurations built from connection keys.
#![allow(clippy::tests_outside_test_module)]

use std::sync::Arc;

use resocks_kbtls::{
    ConnectionKey, KeyedCa, KeyedClientConfig, LeafRole, client_config,
    client_config_for_client_name, insecure_client_config, insecure_server_config, server_config,
    server_config_for_hostname,
};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// Run one handshake over an in-memory pipe and exchange a message each way.
async fn exchange(server: ServerConfig, client: KeyedClientConfig) -> Result<(), String> {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let acceptor = TlsAcceptor::from(Arc::new(server));
    let connector = TlsConnector::from(client.config);

    let server_task = tokio::spawn(async move {
        let mut tls = acceptor
            .accept(server_io)
            .await
            .map_err(|e| format!("server: {e}"))?;
        let mut buf = [0u8; 4];
        tls.read_exact(&mut buf)
            .await
            .map_err(|e| format!("server read: {e}"))?;
        assert_eq!(&buf, b"ping");
        tls.write_all(b"pong")
            .await
            .map_err(|e| format!("server write: {e}"))?;
        tls.flush().await.map_err(|e| format!("server flush: {e}"))?;
        Ok::<_, String>(())
    });

    let client_result = async {
        let mut tls = connector
            .connect(client.server_name, client_io)
            .await
            .map_err(|e| format!("client: {e}"))?;
        tls.write_all(b"ping")
            .await
            .map_err(|e| format!("client write: {e}"))?;
        tls.flush().await.map_err(|e| format!("client flush: {e}"))?;
        let mut buf = [0u8; 4];
        tls.read_exact(&mut buf)
            .await
            .map_err(|e| format!("client read: {e}"))?;
        assert_eq!(&buf, b"pong");
        Ok::<_, String>(())
    }
    .await;

    let server_result = server_task.await.map_err(|e| e.to_string())?;
    client_result.and(server_result)
}

#[tokio::test]
async fn same_key_handshakes_and_exchanges_data() {
    let key = ConnectionKey::generate().unwrap();
    exchange(server_config(&key).unwrap(), client_config(&key).unwrap())
        .await
        .unwrap();
}

#[tokio::test]
async fn different_keys_fail_to_handshake() {
    let server_key = ConnectionKey::generate().unwrap();
    let client_key = ConnectionKey::generate().unwrap();

    let result = exchange(
        server_config(&server_key).unwrap(),
        client_config(&client_key).unwrap(),
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn server_rejects_client_without_certificate() {
    let key = ConnectionKey::generate().unwrap();
    let mut client = insecure_client_config(None, "localhost").unwrap();
    client.server_name = ServerName::try_from(key.tls_name().unwrap()).unwrap();

    let result = exchange(server_config(&key).unwrap(), client).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn custom_client_name_is_accepted() {
    let key = ConnectionKey::generate().unwrap();
    exchange(
        server_config(&key).unwrap(),
        client_config_for_client_name(&key, "relay.example").unwrap(),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn hostname_override_requires_matching_server_name() {
    let key = ConnectionKey::generate().unwrap();

    let mut client = client_config(&key).unwrap();
    client.server_name = ServerName::try_from("tunnel.example").unwrap();
    exchange(
        server_config_for_hostname(&key, "tunnel.example").unwrap(),
        client,
    )
    .await
    .unwrap();

    // Default client expects the key-derived name, not the override.
    let result = exchange(
        server_config_for_hostname(&key, "tunnel.example").unwrap(),
        client_config(&key).unwrap(),
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn insecure_modes_interoperate() {
    let key = ConnectionKey::generate().unwrap();
    let other = ConnectionKey::generate().unwrap();

    // No verification and no client certificate.
    exchange(
        insecure_server_config(&key).unwrap(),
        insecure_client_config(None, "localhost").unwrap(),
    )
    .await
    .unwrap();

    // The server certificate goes unchecked, the client certificate must
    // still come from the server's CA.
    exchange(
        server_config(&key).unwrap(),
        insecure_client_config(Some(&key), "localhost").unwrap(),
    )
    .await
    .unwrap();

    let result = exchange(
        server_config(&key).unwrap(),
        insecure_client_config(Some(&other), "localhost").unwrap(),
    )
    .await;
    assert!(result.is_err());
}

static TLS12_ONLY: &[&rustls::SupportedProtocolVersion] = &[&rustls::version::TLS12];

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

#[tokio::test]
async fn server_refuses_tls12_client() {
    let key = ConnectionKey::generate().unwrap();
    let ca = KeyedCa::new(&key).unwrap();
    let leaf = ca.issue(&key.tls_name().unwrap(), LeafRole::Client).unwrap();
    let mut roots = RootCertStore::empty();
    roots.add(ca.der().clone()).unwrap();

    let config = ClientConfig::builder_with_provider(provider())
        .with_protocol_versions(TLS12_ONLY)
        .unwrap()
        .with_root_certificates(roots)
        .with_client_auth_cert(vec![leaf.cert], leaf.key)
        .unwrap();
    let client = KeyedClientConfig {
        config: Arc::new(config),
        server_name: ServerName::try_from(key.tls_name().unwrap()).unwrap(),
    };

    let result = exchange(server_config(&key).unwrap(), client).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn client_refuses_tls12_server() {
    let key = ConnectionKey::generate().unwrap();
    let ca = KeyedCa::new(&key).unwrap();
    let leaf = ca.issue(&key.tls_name().unwrap(), LeafRole::Server).unwrap();

    let server = ServerConfig::builder_with_provider(provider())
        .with_protocol_versions(TLS12_ONLY)
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![leaf.cert], leaf.key)
        .unwrap();

    let result = exchange(server, client_config(&key).unwrap()).await;
    assert!(result.is_err());
}
