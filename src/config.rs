//! Turning command line values into listener and relay configuration.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use resocks_kbtls::{
    ConnectionKey, KbtlsError, KeyedClientConfig, client_config, insecure_client_config,
    insecure_server_config, server_config,
};
use resocks_tunnel::defaults::DEFAULT_LISTEN_HOST;

/// Errors while resolving configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("parse connection key: {0}")]
    ParseKey(#[source] KbtlsError),
    #[error("generate connection key: {0}")]
    GenerateKey(#[source] KbtlsError),
    #[error("configure TLS: {0}")]
    Tls(#[source] KbtlsError),
    #[error("connection key is required (--key)")]
    KeyRequired,
    #[error("connect back address is required")]
    TargetRequired,
}

/// Append `default_port` to `addr` unless it already carries a port.
pub fn with_default_port(addr: &str, default_port: u16) -> String {
    if addr.parse::<SocketAddr>().is_ok() {
        return addr.to_string();
    }
    if let Ok(IpAddr::V6(ip)) = addr.parse::<IpAddr>() {
        return format!("[{ip}]:{default_port}");
    }
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') || host.ends_with(']') => {
            if port.is_empty() {
                format!("{addr}{default_port}")
            } else {
                addr.to_string()
            }
        }
        _ => format!("{addr}:{default_port}"),
    }
}

/// Address to bind: an empty host means all interfaces.
pub fn bind_address(addr: &str, default_port: u16) -> String {
    let addr = with_default_port(addr, default_port);
    match addr.strip_prefix(':') {
        Some(port) => format!("{DEFAULT_LISTEN_HOST}:{port}"),
        None => addr,
    }
}

/// Host part of a `host:port` address, without IPv6 brackets.
pub fn host_of(addr: &str) -> &str {
    let host = match addr.rsplit_once(':') {
        Some((host, _)) if !host.contains(':') || host.ends_with(']') => host,
        _ => addr,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}

/// Parse durations such as `500ms`, `5s`, `1m30s` or `2h`. A bare number
/// counts as seconds.
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(secs) = text.parse::<f64>() {
        return seconds(secs, text);
    }

    let mut total = 0f64;
    let mut rest = text;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration {text:?}"))?;
        let (number, tail) = rest.split_at(number_len);
        let value: f64 = number
            .parse()
            .map_err(|_| format!("invalid duration {text:?}"))?;

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let scale = match unit {
            "ms" => 0.001,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return Err(format!("unknown unit {unit:?} in duration {text:?}")),
        };

        total += value * scale;
        rest = tail;
    }

    seconds(total, text)
}

fn seconds(secs: f64, text: &str) -> Result<Duration, String> {
    Duration::try_from_secs_f64(secs).map_err(|_| format!("invalid duration {text:?}"))
}

/// Treat an empty key argument like a missing one.
fn non_empty(key: Option<&str>) -> Option<&str> {
    key.map(str::trim).filter(|k| !k.is_empty())
}

/// TLS setup of the listener.
pub struct ListenerTls {
    pub key: ConnectionKey,
    /// The key was generated because none was configured.
    pub generated: bool,
    pub config: rustls::ServerConfig,
}

/// Parse or generate the listener's key and build its server config.
///
/// With `insecure`, relays are not asked for a client certificate.
pub fn listener_tls(key: Option<&str>, insecure: bool) -> Result<ListenerTls, ConfigError> {
    let (key, generated) = match non_empty(key) {
        Some(text) => (text.parse().map_err(ConfigError::ParseKey)?, false),
        None => (
            ConnectionKey::generate().map_err(ConfigError::GenerateKey)?,
            true,
        ),
    };

    let config = if insecure {
        insecure_server_config(&key)
    } else {
        server_config(&key)
    }
    .map_err(ConfigError::Tls)?;

    Ok(ListenerTls {
        key,
        generated,
        config,
    })
}

/// Build the relay's client config.
///
/// Without `insecure` a key is required. With `insecure`, the server
/// certificate is not checked, and a client certificate is only sent when a
/// key is given.
pub fn relay_tls(
    key: Option<&str>,
    insecure: bool,
    target: &str,
) -> Result<KeyedClientConfig, ConfigError> {
    let key = non_empty(key)
        .map(|text| text.parse::<ConnectionKey>().map_err(ConfigError::ParseKey))
        .transpose()?;

    match (key, insecure) {
        (None, false) => Err(ConfigError::KeyRequired),
        (Some(key), false) => client_config(&key).map_err(ConfigError::Tls),
        (key, true) => {
            insecure_client_config(key.as_ref(), host_of(target)).map_err(ConfigError::Tls)
        }
    }
}
