//! Helpers shared by the tunnel integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use resocks_tunnel::{Event, EventKind, EventSink};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Upper bound for anything a test waits on.
pub const BOUND: Duration = Duration::from_secs(10);

pub const BODY: &str = "success";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}

/// Event sink feeding a channel the test can wait on.
pub fn channel_sink() -> (EventSink, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = EventSink::new(move |event| {
        let _ = tx.send(event);
    });
    (sink, rx)
}

/// Receive events until one of `kind` arrives, returning everything seen.
pub async fn wait_for(rx: &mut mpsc::UnboundedReceiver<Event>, kind: EventKind) -> Vec<Event> {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(BOUND, rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        let done = event.kind == kind;
        seen.push(event);
        if done {
            return seen;
        }
    }
}

/// Minimal HTTP server answering every request with [`BODY`].
pub struct HttpStaticServer {
    pub addr: SocketAddr,
}

impl HttpStaticServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut conn, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match conn.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{BODY}",
                        BODY.len()
                    );
                    let _ = conn.write_all(response.as_bytes()).await;
                    let _ = conn.shutdown().await;
                });
            }
        });

        Self { addr }
    }
}

/// HTTP GET `target` through the SOCKS5 proxy at `proxy`, returning the body.
pub async fn http_get_via_socks5(proxy: SocketAddr, target: SocketAddr) -> String {
    let mut conn = TcpStream::connect(proxy).await.unwrap();

    conn.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut method = [0u8; 2];
    conn.read_exact(&mut method).await.unwrap();
    assert_eq!(method, [0x05, 0x00], "no-auth method not selected");

    let SocketAddr::V4(target) = target else {
        panic!("test target must be IPv4");
    };
    let mut request = vec![0x05, 0x01, 0x00, 0x01];
    request.extend_from_slice(&target.ip().octets());
    request.extend_from_slice(&target.port().to_be_bytes());
    conn.write_all(&request).await.unwrap();

    let mut reply = [0u8; 10];
    conn.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[1], 0x00, "CONNECT failed with reply {:#04x}", reply[1]);

    conn.write_all(format!("GET / HTTP/1.1\r\nHost: {target}\r\n\r\n").as_bytes())
        .await
        .unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(BOUND, conn.read_to_end(&mut response))
        .await
        .expect("timed out reading response")
        .unwrap();

    let response = String::from_utf8(response).unwrap();
    let (_, body) = response
        .split_once("\r\n\r\n")
        .expect("response without header terminator");
    body.to_string()
}

pub fn kinds(events: &[Event]) -> Vec<EventKind> {
    events.iter().map(|e| e.kind).collect()
}

pub fn forwarding_addr(events: &[Event]) -> SocketAddr {
    events
        .iter()
        .find(|e| e.kind == EventKind::ForwardingActive)
        .expect("no forwarding-active event")
        .data
        .parse()
        .expect("forwarding-active data is not an address")
}
