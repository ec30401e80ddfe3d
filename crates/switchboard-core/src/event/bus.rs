//! Fan-out of [`TriageEvent`]s to the notification side.
//!
//! The engine, the router and both monitors publish into one
//! `tokio::sync::broadcast` channel. A subscriber that falls more than the
//! channel capacity behind sees `RecvError::Lagged` and skips ahead; nothing
//! on the publishing side ever waits for consumers.

use switchboard_types::event::TriageEvent;
use tokio::sync::broadcast;

/// Channel capacity used by the server.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Cheap to clone: every clone publishes into the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<TriageEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// A receiver for every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TriageEvent> {
        self.sender.subscribe()
    }

    /// Publish to the current subscribers and return how many were reached.
    /// Zero is normal when no notifier is attached.
    pub fn publish(&self, event: TriageEvent) -> usize {
        let kind = event.kind();
        match self.sender.send(event) {
            Ok(reached) => {
                tracing::trace!(event = kind, reached, "event published");
                reached
            }
            Err(_) => 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
