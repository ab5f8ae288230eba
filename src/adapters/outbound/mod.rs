mod broadcast_event_sink;
mod dashmap_session_repo;
mod http_health_probe;
mod reqwest_forwarder;
mod static_discovery;
mod tracing_event_sink;

pub use broadcast_event_sink::BroadcastEventSink;
pub use dashmap_session_repo::DashMapSessionRepository;
pub use http_health_probe::{HttpHealthProbe, TcpHealthProbe};
pub use reqwest_forwarder::ReqwestForwarder;
pub use static_discovery::StaticDiscovery;
pub use tracing_event_sink::TracingEventSink;
