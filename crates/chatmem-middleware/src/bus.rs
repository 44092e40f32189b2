//! Best-effort status bus.
//!
//! Uses a [`tokio::sync::broadcast`] channel under the hood so that every
//! subscriber (a chat UI, a log forwarder, a test) receives every
//! [`StatusEvent`] without any single subscriber blocking the others or the
//! dispatcher that publishes them.
//!
//! Delivery is strictly best-effort: publishing with nobody listening is a
//! normal condition and returns `0`, and a subscriber that falls behind loses
//! the oldest events instead of applying back-pressure.  Storage outcomes
//! never depend on whether a status event was delivered.

use chatmem_types::StatusEvent;
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Shared status bus. Clone it cheaply – all clones share the same underlying
/// broadcast channel.
#[derive(Clone, Debug)]
pub struct StatusBus {
    sender: broadcast::Sender<StatusEvent>,
}

impl StatusBus {
    /// Create a new bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish `event` to every current subscriber.
    ///
    /// Returns the number of receivers that were handed the event; `0` when
    /// nobody is listening.
    pub fn publish(&self, event: StatusEvent) -> usize {
        trace!(status = ?event.status, done = event.done, "{}", event.description);
        // SendError only signals "no receivers", which is not a failure here.
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to every event on the bus.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }

    /// Subscribe and only receive events tagged with `session`.
    pub fn subscribe_session(&self, session: impl Into<String>) -> SessionSubscriber {
        SessionSubscriber {
            session: session.into(),
            receiver: self.sender.subscribe(),
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Session-filtered subscriber
// ---------------------------------------------------------------------------

/// A subscriber that only delivers events belonging to one conversation.
pub struct SessionSubscriber {
    session: String,
    receiver: broadcast::Receiver<StatusEvent>,
}

impl SessionSubscriber {
    /// Wait for the next event for this subscriber's session.
    ///
    /// Returns `None` when the bus is closed and no further events will arrive.
    pub async fn recv(&mut self) -> Option<StatusEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.session.as_deref() == Some(self.session.as_str()) => {
                    return Some(event);
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(session = %self.session, lagged_by = n, "SessionSubscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// The session this subscriber is bound to.
    pub fn session(&self) -> &str {
        &self.session
    }
}
