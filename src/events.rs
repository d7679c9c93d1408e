//! Typed connection events for observers

use crate::error::SdkError;
use tokio::sync::broadcast;
use tracing::trace;

/// Capacity of the event channel; slow subscribers see `Lagged`
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Connection lifecycle notifications
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A session was established
    Connected { endpoint: String, chain: String },
    /// The transport behind the live session was lost
    Disconnected { endpoint: String },
    /// Automatic recovery gave up; the client stays disconnected until the next call
    ReconnectFailed { error: SdkError },
}

/// Fan-out of connection events to any number of subscribers
#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<ConnectionEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: ConnectionEvent) {
        // No subscribers is fine
        if self.tx.send(event).is_err() {
            trace!("connection event dropped, no subscribers");
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let hub = EventHub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        hub.publish(ConnectionEvent::Disconnected {
            endpoint: "ws://a".into(),
        });

        assert!(matches!(a.recv().await, Ok(ConnectionEvent::Disconnected { .. })));
        assert!(matches!(b.recv().await, Ok(ConnectionEvent::Disconnected { .. })));
    }

    #[test]
    fn test_publish_without_subscribers() {
        EventHub::new().publish(ConnectionEvent::ReconnectFailed {
            error: SdkError::NotConnected,
        });
    }
}
