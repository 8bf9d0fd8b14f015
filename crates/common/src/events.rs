//! Broadcast of subscription lifecycle events
//!
//! Every component that needs to react to changes (the config saver, the
//! scheduler, the association publisher, a UI) holds its own [`EventSubscriber`].
//! Publishing never blocks and never fails because of a slow or dropped
//! subscriber; events a subscriber missed are counted instead.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::content_id::ContentId;

const EVENT_CAPACITY: usize = 1024;

/// Why an entity reported a change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeReason {
    /// Signed details changed (name, visibility, payload) or an upgrade was applied
    Details,
    /// Local-only metadata (subscribed flag, local name, popularity, prompt state)
    Metadata,
    /// Poll history or history settings
    History,
    /// Associations were added or their publish state changed
    Associations,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    Added { id: String },
    Removed { id: String },
    Changed { id: String, reason: ChangeReason },
    /// A reconcile stored results; `new_unread` counts fresh unread ones
    ResultsChanged { id: String, new_unread: usize },
    /// A poll attempt finished (successfully or not)
    Downloaded { id: String },
    AssociationsChanged { hash: ContentId },
    Upgraded { id: String, version: u32 },
}

/// Cloneable publishing side of the bus
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SubscriptionEvent>,
    lagged: Arc<AtomicU64>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            tx,
            lagged: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn publish(&self, event: SubscriptionEvent) {
        tracing::trace!("event: {:?}", event);
        // an error only means nobody is listening right now
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> EventSubscriber {
        EventSubscriber {
            rx: self.tx.subscribe(),
            lagged: self.lagged.clone(),
        }
    }

    /// Total events dropped across all subscribers that fell behind
    pub fn lagged_events(&self) -> u64 {
        self.lagged.load(Ordering::Relaxed)
    }
}

pub struct EventSubscriber {
    rx: broadcast::Receiver<SubscriptionEvent>,
    lagged: Arc<AtomicU64>,
}

impl EventSubscriber {
    /// Next event, or `None` once every publisher is gone.
    pub async fn recv(&mut self) -> Option<SubscriptionEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("event subscriber lagged, {} events dropped", n);
                    self.lagged.fetch_add(n, Ordering::Relaxed);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv)
    pub fn try_recv(&mut self) -> Option<SubscriptionEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    self.lagged.fetch_add(n, Ordering::Relaxed);
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_sees_events() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(SubscriptionEvent::Added { id: "x".into() });

        assert_eq!(a.recv().await, Some(SubscriptionEvent::Added { id: "x".into() }));
        assert_eq!(b.recv().await, Some(SubscriptionEvent::Added { id: "x".into() }));
    }

    #[tokio::test]
    async fn test_dropped_subscriber_does_not_affect_others() {
        let bus = EventBus::new();
        let dropped = bus.subscribe();
        let mut kept = bus.subscribe();
        drop(dropped);

        bus.publish(SubscriptionEvent::Removed { id: "y".into() });
        assert_eq!(kept.try_recv(), Some(SubscriptionEvent::Removed { id: "y".into() }));
    }

    #[test]
    fn test_lagging_subscriber_is_counted() {
        let bus = EventBus::new();
        let mut slow = bus.subscribe();
        for i in 0..(EVENT_CAPACITY + 5) {
            bus.publish(SubscriptionEvent::Downloaded { id: i.to_string() });
        }
        assert!(slow.try_recv().is_some());
        assert_eq!(bus.lagged_events(), 5);
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.publish(SubscriptionEvent::Downloaded { id: "z".into() });
        assert_eq!(bus.lagged_events(), 0);
    }
}
