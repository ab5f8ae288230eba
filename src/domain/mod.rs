//! Domain Layer
//!
//! Entities, value objects, events, ports and pure services. Nothing in
//! here performs I/O or holds locks.

pub mod entities;
pub mod events;
pub mod ports;
pub mod services;
pub mod value_objects;
