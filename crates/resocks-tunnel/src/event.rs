//! Lifecycle events reported to an injected callback.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

/// Kind of a tunnel [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A relay connected; data is its IP address.
    RelayConnected,
    /// The relay connection ended; data is the reason, if any.
    RelayDisconnected,
    /// The local forwarding listener is up; data is its bound address.
    ForwardingActive,
    /// The local forwarding listener stopped.
    ForwardingInactive,
    /// A local client connected; data is its IP address.
    ConnectionOpened,
    /// A local client connection ended; data is its IP address.
    ConnectionClosed,
    /// Something went wrong; data is the message.
    Error,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::RelayConnected => "relay connected",
            EventKind::RelayDisconnected => "relay disconnected",
            EventKind::ForwardingActive => "SOCKS5 server active",
            EventKind::ForwardingInactive => "SOCKS5 server inactive",
            EventKind::ConnectionOpened => "SOCKS5 connection opened",
            EventKind::ConnectionClosed => "SOCKS5 connection closed",
            EventKind::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub data: String,
}

type Callback = Arc<dyn Fn(Event) + Send + Sync>;

/// Destination of tunnel events. Cheap to clone.
///
/// The default sink drops every event after tracing it.
#[derive(Clone, Default)]
pub struct EventSink {
    callback: Option<Callback>,
}

impl EventSink {
    pub fn new(callback: impl Fn(Event) + Send + Sync + 'static) -> Self {
        Self {
            callback: Some(Arc::new(callback)),
        }
    }

    /// Sink that prints events for a terminal user, see [`print_event`].
    pub fn stdio() -> Self {
        Self::new(print_event)
    }

    pub fn emit(&self, kind: EventKind, data: impl Into<String>) {
        let event = Event {
            kind,
            data: data.into(),
        };
        debug!(kind = %event.kind, data = %event.data, "event");

        if let Some(callback) = &self.callback {
            callback(event);
        }
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// Errors go to stderr, lifecycle events to stdout. Per-connection events
/// are not printed.
pub fn print_event(event: Event) {
    match event.kind {
        EventKind::Error => eprintln!("error: {}", event.data),
        EventKind::ConnectionOpened | EventKind::ConnectionClosed => {}
        _ => println!("{}", describe(&event)),
    }
}

fn describe(event: &Event) -> String {
    match event.kind {
        EventKind::RelayConnected => format!("relay {} connected", event.data),
        EventKind::RelayDisconnected if event.data.is_empty() => "relay disconnected".to_string(),
        EventKind::RelayDisconnected => format!("relay disconnected: {}", event.data),
        EventKind::ForwardingActive if !event.data.is_empty() => {
            format!("SOCKS5 server active on {}", event.data)
        }
        kind => kind.as_str().to_string(),
    }
}
