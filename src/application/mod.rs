//! Application Layer
//!
//! Use cases that compose the domain and infrastructure components.

pub mod gateway;

pub use gateway::{Gateway, GatewayDeps, GatewaySnapshot, CACHE_HEADER, SERVER_HEADER};
