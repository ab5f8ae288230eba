//! Session Repository Port
//!
//! Defines the interface for sticky-session bindings.
//! Bindings route a client session back to the same server.

use crate::domain::entities::SessionBinding;

/// Repository for session-to-server bindings.
///
/// Bindings older than the repository's TTL are treated as absent on
/// lookup and removed at that point; `purge_expired` sweeps the rest.
pub trait SessionRepository: Send + Sync {
    /// Get the live binding for a session, expiring it lazily if stale.
    fn lookup(&self, session_id: &str) -> Option<SessionBinding>;

    /// Create or overwrite the binding for a session.
    fn bind(&self, session_id: &str, server_id: &str);

    /// Remove the binding for a session. Returns whether one existed.
    fn remove(&self, session_id: &str) -> bool;

    /// Remove every binding pointing at a server.
    fn remove_server(&self, server_id: &str) -> usize;

    /// Remove all expired bindings.
    fn purge_expired(&self) -> usize;

    /// Number of stored bindings (expired ones included until purged).
    fn count(&self) -> usize;
}
