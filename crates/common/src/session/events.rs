/// How a status line should be presented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Error,
}

/// Events surfaced by a running session
///
/// The session never renders anything itself; whoever owns the session
/// drains these from [`Session::events`](crate::session::Session::events)
/// and decides how to show them.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A human-readable status line
    Status {
        message: String,
        severity: Severity,
    },
    /// The number of currently connected peers changed
    PeerCount(usize),
}

/// Cloneable sender half of the session event channel
///
/// Sends never block and never fail: a session nobody is listening to just
/// drops its events.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: flume::Sender<SessionEvent>,
}

impl EventSender {
    pub fn new() -> (Self, flume::Receiver<SessionEvent>) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, rx)
    }

    pub fn send(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.send(SessionEvent::Status {
            message: message.into(),
            severity: Severity::Info,
        });
    }

    pub fn success(&self, message: impl Into<String>) {
        self.send(SessionEvent::Status {
            message: message.into(),
            severity: Severity::Success,
        });
    }

    pub fn error(&self, message: impl Into<String>) {
        self.send(SessionEvent::Status {
            message: message.into(),
            severity: Severity::Error,
        });
    }

    pub fn peer_count(&self, count: usize) {
        self.send(SessionEvent::PeerCount(count));
    }
}
