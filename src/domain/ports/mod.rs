mod event_sink;
mod forwarder;
mod health_probe;
mod service_discovery;
mod session_repository;

pub use event_sink::{EventSink, FanoutEventSink, NullEventSink};
pub use forwarder::{ForwardError, Forwarder};
pub use health_probe::{HealthProbe, ProbeError};
pub use service_discovery::ServiceDiscovery;
pub use session_repository::SessionRepository;
