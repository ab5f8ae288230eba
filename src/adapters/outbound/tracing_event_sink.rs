//! Tracing Event Sink
//!
//! Writes gateway events to the log. High-volume per-request events go to
//! `trace`, health changes to `warn`.

use crate::domain::events::GatewayEvent;
use crate::domain::ports::EventSink;

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: GatewayEvent) {
        let name = event.name();
        match &event {
            GatewayEvent::ServerSelected { .. } | GatewayEvent::RequestComplete { .. } => {
                tracing::trace!(event = name, "{:?}", event);
            }
            GatewayEvent::HealthCheckComplete { .. } => {
                tracing::debug!(event = name, "{:?}", event);
            }
            GatewayEvent::ServerDegraded { .. }
            | GatewayEvent::ServerUnhealthy { .. }
            | GatewayEvent::NoServersAvailable { .. } => {
                tracing::warn!(event = name, "{:?}", event);
            }
            _ => tracing::info!(event = name, "{:?}", event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn test_unhealthy_is_logged() {
        TracingEventSink.publish(GatewayEvent::ServerUnhealthy {
            id: "backend-7".to_string(),
            consecutive_failures: 3,
            error: Some("timeout".to_string()),
        });
        assert!(logs_contain("server:unhealthy"));
        assert!(logs_contain("backend-7"));
    }
}
