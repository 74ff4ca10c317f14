//! Notification sink: the out-of-band channel from the core to its shell.
//!
//! The core never blocks on the shell. Events are pushed with `try_send`;
//! when the shell falls behind, events are dropped and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

/// Events the core reports upward to a UI or a test harness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    /// Free-form diagnostic line.
    Log(String),
    /// The roster changed; mirrors should refetch.
    UsersUpdated,
    /// A user came online.
    Online(String),
    /// A user went offline.
    Offline(String),
    /// A message arrived; `Some(sender)` for private, `None` for public.
    NewMsg(Option<String>),
    /// No frame has arrived from the peer within the heartbeat interval.
    ConnectionLost,
    /// The server refused an operation for lack of authentication.
    NotLogin,
}

/// Non-blocking sender half handed to the core at construction.
#[derive(Clone)]
pub struct NotificationSink {
    tx: mpsc::Sender<SinkEvent>,
    dropped: Arc<AtomicU64>,
}

impl NotificationSink {
    /// Create a sink and the receiver its shell drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SinkEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Deliver an event without blocking. Overflow drops the event and
    /// bumps the counter.
    pub fn emit(&self, event: SinkEvent) {
        if let Err(err) = self.tx.try_send(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(event = ?err, "notification dropped");
        }
    }

    /// Number of events dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_are_delivered() {
        let (sink, mut rx) = NotificationSink::channel(8);
        sink.emit(SinkEvent::Online("alice".into()));
        sink.emit(SinkEvent::NewMsg(None));

        assert_eq!(rx.recv().await, Some(SinkEvent::Online("alice".into())));
        assert_eq!(rx.recv().await, Some(SinkEvent::NewMsg(None)));
        assert_eq!(sink.dropped(), 0);
    }

    #[tokio::test]
    async fn test_overflow_drops_and_counts() {
        let (sink, mut rx) = NotificationSink::channel(1);
        sink.emit(SinkEvent::UsersUpdated);
        sink.emit(SinkEvent::UsersUpdated);
        sink.emit(SinkEvent::UsersUpdated);

        assert_eq!(sink.dropped(), 2);
        assert_eq!(rx.recv().await, Some(SinkEvent::UsersUpdated));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_receiver_counts_drops() {
        let (sink, rx) = NotificationSink::channel(1);
        drop(rx);
        sink.emit(SinkEvent::ConnectionLost);
        assert_eq!(sink.dropped(), 1);
    }
}
