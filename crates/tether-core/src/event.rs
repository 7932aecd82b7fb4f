//! Lifecycle notifications
//!
//! Every state transition, guard decision, and stage result the session goes
//! through is published as a [`SessionEvent`] on a broadcast bus. The set of
//! kinds is closed: observers match on the enum instead of string names.

use tokio::sync::broadcast;

/// Capacity of the session event channel.
///
/// Events are small and observers (the CLI) drain quickly; 256 covers a
/// burst of watcher-triggered notifications without dropping history.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Phase of a dependency installation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallPhase {
    /// An install was requested (fires even when the request is dropped)
    Triggered,
    /// The guard was acquired and the remote command is running
    Started,
    /// The remote command finished with the given exit status
    Ended { exit_code: u32 },
}

/// A session lifecycle notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session is starting
    Start,
    /// A synchronization pass was requested
    Sync,
    /// A synchronization request arrived while a pass was in flight and was
    /// dropped
    SyncSkipped,
    /// A post-initial synchronization pass failed; the session keeps running
    SyncFailed { message: String },
    /// Dependency installation progress
    Install(InstallPhase),
    /// The remote runner was launched over the live channel
    RunnerStart,
    /// A one-shot remote command is being executed
    Exec { command: String },
    /// The session is shutting down
    Close,
    /// A fatal error; `close` follows
    Error { message: String },
}

/// An event on the persistent remote channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The live channel is connected and the shell is ready
    Connected,
    /// The channel closed; if the session was running, the remote runner is
    /// gone
    Closed,
    /// The transport reported an error
    Error { message: String },
}

/// Broadcast fan-out for [`SessionEvent`]s.
///
/// Emitting never blocks and never fails; events sent with no subscribers
/// are dropped, and a slow subscriber observes a `Lagged` error rather than
/// back-pressuring the session.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    /// Create a bus with the default capacity.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to all events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all current subscribers.
    pub fn emit(&self, event: SessionEvent) {
        tracing::debug!(?event, "session event");
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(SessionEvent::Start);
        bus.emit(SessionEvent::Sync);
        bus.emit(SessionEvent::Install(InstallPhase::Triggered));

        assert_eq!(rx.recv().await.unwrap(), SessionEvent::Start);
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::Sync);
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::Install(InstallPhase::Triggered)
        );
    }

    #[test]
    fn test_emit_without_subscribers_is_a_no_op() {
        let bus = EventBus::new();
        bus.emit(SessionEvent::Close);
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_events() {
        let bus = EventBus::new();
        bus.emit(SessionEvent::Start);

        let mut rx = bus.subscribe();
        bus.emit(SessionEvent::Close);
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::Close);
    }
}
