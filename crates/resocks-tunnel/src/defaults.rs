//! Default configuration values.

use std::time::Duration;

// ============================================================================
// Addresses
// ============================================================================

/// Port of the local SOCKS5 forwarding listener.
pub const DEFAULT_PROXY_PORT: u16 = 1080;
/// Port the listener accepts relay connections on.
pub const DEFAULT_LISTEN_PORT: u16 = 4080;
/// Host of the public relay listener (all interfaces).
pub const DEFAULT_LISTEN_HOST: &str = "0.0.0.0";
/// Host of the local SOCKS5 forwarding listener.
pub const DEFAULT_PROXY_HOST: &str = "localhost";

/// Environment variable holding the default connection key.
pub const CONNECTION_KEY_ENV: &str = "RESOCKS_KEY";

// ============================================================================
// Timeouts
// ============================================================================

/// Relay dial timeout, covering TCP connect and TLS handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// TLS handshake timeout on the listener side.
pub const DEFAULT_TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Buffers and framing
// ============================================================================

/// Buffer size of each copy direction when piping connections.
pub const DEFAULT_PIPE_BUFFER_SIZE: usize = 16 * 1024;
/// Largest accepted control message (64 KiB).
pub const MAX_CONTROL_FRAME_LEN: usize = 64 * 1024;
