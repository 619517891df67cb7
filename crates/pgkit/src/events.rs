//! Client lifecycle and pool events.

use tokio::sync::broadcast;

use crate::listener::Notification;

/// Capacity of the per-client event channel. Slow subscribers lag and skip.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events published on [`crate::Client::events`].
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A new physical connection was established
    Connect,
    /// A connection was checked out of the pool
    Acquire,
    /// A connection was removed from the pool
    Remove,
    /// The client shut down its connections
    End,
    /// A pool or connection error
    Error { message: String, recoverable: bool },
    /// A LISTEN/NOTIFY delivery
    Notification(Notification),
    /// The listener (re)connected
    ListenerConnect,
    /// The listener lost its connection or failed to reconnect
    ListenerError { message: String },
}

/// Sending half shared by the client, backend and listener.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ClientEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: ClientEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }
}
