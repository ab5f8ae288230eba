//! Broadcast Event Sink
//!
//! Publishes gateway events onto a tokio broadcast channel so external
//! collaborators (alerting, dashboards) can subscribe.

use crate::domain::events::GatewayEvent;
use crate::domain::ports::EventSink;
use tokio::sync::broadcast;

/// Channel-backed event sink. Slow subscribers lag rather than block.
#[derive(Clone)]
pub struct BroadcastEventSink {
    tx: broadcast::Sender<GatewayEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventSink for BroadcastEventSink {
    fn publish(&self, event: GatewayEvent) {
        // no subscribers is not an error
        let _ = self.tx.send(event);
    }
}
