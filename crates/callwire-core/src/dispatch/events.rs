//! Server-side event sources.

use crate::config::ProtocolConfig;
use crate::error::Result;
use crate::message::{Argument, IntoArguments};
use tokio::sync::broadcast;
use tracing::trace;

/// One raised event: name plus typed arguments.
#[derive(Debug, Clone)]
pub struct RaisedEvent {
    pub name: String,
    pub arguments: Vec<Argument>,
}

/// Broadcasts events to every ready server session.
///
/// Clones share the same channel, so a service can keep one clone and hand
/// another to [`ServiceBuilder::with_events`](super::ServiceBuilder::with_events).
#[derive(Debug, Clone)]
pub struct EventHub {
    sender: broadcast::Sender<RaisedEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::with_capacity(ProtocolConfig::EVENT_HUB_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Raise `name` with `arguments`. Returns the number of sessions that
    /// will receive it; zero when nobody is connected.
    pub fn raise(&self, name: impl Into<String>, arguments: impl IntoArguments) -> Result<usize> {
        let event = RaisedEvent {
            name: name.into(),
            arguments: arguments.into_arguments()?,
        };
        trace!("Raising event {}", event.name);
        Ok(self.sender.send(event).unwrap_or(0))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RaisedEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
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
    async fn test_raise_reaches_every_subscriber() {
        let hub = EventHub::new();
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();

        assert_eq!(hub.raise("Tick", (7i64,)).unwrap(), 2);

        for receiver in [&mut first, &mut second] {
            let event = receiver.recv().await.unwrap();
            assert_eq!(event.name, "Tick");
            assert_eq!(event.arguments[0].value, serde_json::json!(7));
        }
    }

    #[test]
    fn test_raise_without_subscribers() {
        let hub = EventHub::new();
        assert_eq!(hub.raise("Tick", ()).unwrap(), 0);
        assert_eq!(hub.subscriber_count(), 0);
    }
}
