//! Event Sink Port
//!
//! Observer interface the pool, health monitor and gateway publish onto.

use crate::domain::events::GatewayEvent;

/// Subscriber-facing event channel.
///
/// Implementations must not block: publishing happens on the request path.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: GatewayEvent);
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn publish(&self, _event: GatewayEvent) {}
}

/// Sink that forwards every event to several sinks in order.
#[derive(Default, Clone)]
pub struct FanoutEventSink {
    sinks: Vec<std::sync::Arc<dyn EventSink>>,
}

impl FanoutEventSink {
    pub fn new(sinks: Vec<std::sync::Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanoutEventSink {
    fn publish(&self, event: GatewayEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.publish(event.clone());
            }
            last.publish(event);
        }
    }
}
