//! Command line interface of the `resocks` binary.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use resocks_kbtls::ConnectionKey;
use resocks_tunnel::defaults::{
    CONNECTION_KEY_ENV, DEFAULT_CONNECT_TIMEOUT, DEFAULT_LISTEN_PORT, DEFAULT_PROXY_HOST,
    DEFAULT_PROXY_PORT,
};
use resocks_tunnel::{EventSink, ListenerConfig, ProxyListener, RelayConfig, RelayConnector};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{
    ConfigError, bind_address, listener_tls, parse_duration, relay_tls, with_default_port,
};

/// Reverse SOCKS5 proxy over mutually authenticated TLS.
///
/// Without a subcommand, runs the relay and connects back to a listener.
#[derive(Parser, Debug)]
#[command(
    name = "resocks",
    version,
    about = "Reverse SOCKS5 proxy over mutually authenticated TLS"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub relay: RelayArgs,

    /// Log level or tracing filter directive.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Wait for a relay and serve SOCKS5 locally through it.
    Listen(ListenArgs),

    /// Print a new random connection key.
    Generate,
}

#[derive(Args, Debug)]
pub struct RelayArgs {
    /// Address of the listener to connect back to.
    #[arg(value_name = "CONNECT_BACK_ADDRESS")]
    pub target: Option<String>,

    /// Connection key shared with the listener.
    #[arg(short, long, env = CONNECTION_KEY_ENV, hide_env_values = true)]
    pub key: Option<String>,

    /// Dial timeout including the TLS handshake [default: 5s].
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Reconnect after this delay; 0 disables reconnecting.
    #[arg(long, default_value = "0", value_parser = parse_duration)]
    pub reconnect_after: Duration,

    /// Do not verify the listener's certificate.
    #[arg(long)]
    pub insecure: bool,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Address to accept relay connections on [default: 0.0.0.0:4080].
    #[arg(long = "on", value_name = "ADDRESS")]
    pub listen_addr: Option<String>,

    /// Local SOCKS5 address [default: localhost:1080].
    #[arg(short, long, value_name = "ADDRESS")]
    pub proxy_address: Option<String>,

    /// Connection key; a new one is generated when empty.
    #[arg(short, long, env = CONNECTION_KEY_ENV, hide_env_values = true)]
    pub key: Option<String>,

    /// Accept relays without a client certificate.
    #[arg(long)]
    pub insecure: bool,

    /// Exit when the first relay disconnects.
    #[arg(long)]
    pub abort_on_disconnect: bool,
}

/// Run the command selected on the command line.
pub async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(&cli.log_level);

    match cli.command {
        Some(Command::Generate) => {
            println!("{}", ConnectionKey::generate()?);
            Ok(())
        }
        Some(Command::Listen(args)) => run_listener(args).await,
        None => run_relay(cli.relay).await,
    }
}

async fn run_listener(args: ListenArgs) -> Result<(), Box<dyn std::error::Error>> {
    let tls = listener_tls(args.key.as_deref(), args.insecure)?;
    if tls.generated {
        println!("connection key: {}", tls.key);
    }

    let listen_addr = bind_address(args.listen_addr.as_deref().unwrap_or(""), DEFAULT_LISTEN_PORT);
    let forward_addr = with_default_port(
        args.proxy_address.as_deref().unwrap_or(DEFAULT_PROXY_HOST),
        DEFAULT_PROXY_PORT,
    );

    let listener = ProxyListener::bind(ListenerConfig {
        listen_addr,
        forward_addr,
        abort_on_disconnect: args.abort_on_disconnect,
        tls: Arc::new(tls.config),
    })
    .await?;
    println!("listening for relays on {}", listener.local_addr()?);

    let shutdown = spawn_shutdown_handler();
    listener.run(&EventSink::stdio(), &shutdown).await?;
    Ok(())
}

async fn run_relay(args: RelayArgs) -> Result<(), Box<dyn std::error::Error>> {
    let target = args.target.ok_or(ConfigError::TargetRequired)?;
    let target = with_default_port(&target, DEFAULT_LISTEN_PORT);
    let tls = relay_tls(args.key.as_deref(), args.insecure, &target)?;

    let connector = RelayConnector::new(RelayConfig {
        target,
        tls,
        timeout: args.timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
        reconnect_after: args.reconnect_after,
    });

    let shutdown = spawn_shutdown_handler();
    connector.run(&EventSink::stdio(), &shutdown).await?;
    Ok(())
}

fn spawn_shutdown_handler() -> CancellationToken {
    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();

    tokio::spawn(async move {
        shutdown_signal_handler().await;
        info!("shutdown signal received");
        shutdown_signal.cancel();
    });

    shutdown
}

async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}
