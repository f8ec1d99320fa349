//! Line-oriented progress stream back to the client that requested a change.
//!
//! Informational lines start with `>`, errors with `!`. A finished change ends
//! with a bare `SUCCESS` or `FAILED` line; a change handed off to a new master
//! ends with the downgrade notice and no status line.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

/// Notice sent when the master is downgraded mid-change.
pub const DOWNGRADE_NOTICE: &str = "Master node downgrading - new master will resume schemachange";

/// Destination for client lines.
pub trait ClientSink: Send + Sync + 'static {
    /// Writes one line.
    fn send_line(&self, line: &str);

    /// Closes the connection.
    fn close(&self);
}

/// Handle to the requesting client, or to nobody for internal changes.
#[derive(Clone, Default)]
pub struct ClientStream {
    sink: Option<Arc<dyn ClientSink>>,
}

impl ClientStream {
    /// Stream to a connected client.
    pub fn new(sink: Arc<dyn ClientSink>) -> Self {
        Self { sink: Some(sink) }
    }

    /// Stream with no client attached (resumed changes).
    #[must_use]
    pub fn detached() -> Self {
        Self::default()
    }

    /// Whether a client is attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.sink.is_some()
    }

    /// Informational line.
    pub fn info(&self, message: impl AsRef<str>) {
        self.send(&format!(">{}", message.as_ref()));
    }

    /// Error line.
    pub fn error(&self, message: impl AsRef<str>) {
        self.send(&format!("!{}", message.as_ref()));
    }

    /// Terminal status line.
    pub fn status(&self, success: bool) {
        self.send(if success { "SUCCESS" } else { "FAILED" });
    }

    /// Tells the client a new master will pick the change up, then hangs up.
    pub fn downgrading(&self) {
        self.error(DOWNGRADE_NOTICE);
        self.close();
    }

    /// Closes the client connection.
    pub fn close(&self) {
        if let Some(sink) = &self.sink {
            sink.close();
        }
    }

    fn send(&self, line: &str) {
        if let Some(sink) = &self.sink {
            sink.send_line(line);
        }
    }
}

impl std::fmt::Debug for ClientStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientStream")
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Client sink backed by an unbounded channel.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
    closed: AtomicBool,
}

impl ChannelSink {
    /// Creates a sink and the receiver for its lines.
    #[must_use]
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                tx,
                closed: AtomicBool::new(false),
            }),
            rx,
        )
    }

    /// Whether the connection was closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl ClientSink for ChannelSink {
    fn send_line(&self, line: &str) {
        if !self.is_closed() {
            let _ = self.tx.send(line.to_string());
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
