//! Event bus primitives.
//!
//! A thin wrapper over `tokio::sync::broadcast`. Publishers never block and
//! never fail because nobody is listening; slow subscribers observe
//! `RecvError::Lagged` and are expected to resynchronise.

use tokio::sync::broadcast;

/// Default capacity for event broadcast channels
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Fan-out channel for domain events of type `E`.
#[derive(Debug)]
pub struct EventBus<E> {
    sender: broadcast::Sender<E>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<E: Clone + Send + 'static> EventBus<E> {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event. Returns the number of subscribers that will see it.
    pub fn publish(&self, event: E) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                tracing::trace!(target: "shelfswap-events", "event dropped, no subscribers");
                0
            }
        }
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}
