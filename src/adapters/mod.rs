//! Adapters Layer
//!
//! Inbound adapters drive the application (HTTP listeners); outbound
//! adapters implement the domain ports (probes, forwarding, sessions, events).

pub mod inbound;
pub mod outbound;
