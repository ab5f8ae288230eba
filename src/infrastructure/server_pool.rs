//! Server Pool
//!
//! Registered backends, their live counters and the selection cursor,
//! behind one coarse lock. Selection itself is delegated to the pure
//! [`LoadBalancer`].

use crate::domain::entities::{
    HealthTransition, RequestContext, ServerConfig, ServerEntry, ServerSnapshot,
};
use crate::domain::events::GatewayEvent;
use crate::domain::ports::{EventSink, ProbeError, SessionRepository};
use crate::domain::services::LoadBalancer;
use crate::domain::value_objects::{Algorithm, FailureCoupling, HealthStatus};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Selection algorithm at startup
    pub algorithm: Algorithm,
    /// How request outcomes feed health tracking
    pub failure_coupling: FailureCoupling,
    /// Consecutive failures before an entry becomes unhealthy
    pub max_failures: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::RoundRobin,
            failure_coupling: FailureCoupling::Shared,
            max_failures: 3,
        }
    }
}

/// Registration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("server already registered: {0}")]
    DuplicateId(String),
    #[error("invalid server url: {0}")]
    InvalidUrl(String),
}

/// Outcome of a successful selection.
#[derive(Debug, Clone)]
pub struct Selection {
    /// Snapshot of the entry after its connection count was incremented
    pub server: ServerEntry,
    /// Whether a sticky binding decided the pick
    pub sticky: bool,
}

/// A dispatched request's claim on one connection slot.
///
/// [`complete`](Self::complete) records the outcome. Dropping the lease
/// without completing it (client gone, caller timeout) hands the slot back
/// without recording anything.
pub struct ConnectionLease {
    pool: Arc<ServerPool>,
    server: ServerEntry,
    sticky: bool,
    completed: bool,
}

impl ConnectionLease {
    /// Snapshot of the entry taken at selection time
    pub fn server(&self) -> &ServerEntry {
        &self.server
    }

    pub fn sticky(&self) -> bool {
        self.sticky
    }

    /// Report the outcome and release the slot.
    pub fn complete(mut self, success: bool, response_time_ms: u64) -> bool {
        self.completed = true;
        self.pool
            .mark_complete(&self.server.id, success, response_time_ms)
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        if !self.completed {
            tracing::debug!("request to {} abandoned before completion", self.server.id);
            self.pool.release(&self.server.id);
        }
    }
}

struct PoolState {
    entries: Vec<ServerEntry>,
    cursor: usize,
    algorithm: Algorithm,
}

/// Shared server pool.
///
/// Every mutation takes the write lock for the duration of an in-memory
/// update only; probes and forwarding happen outside of it.
pub struct ServerPool {
    config: PoolConfig,
    state: RwLock<PoolState>,
    sessions: Option<Arc<dyn SessionRepository>>,
    events: Arc<dyn EventSink>,
}

impl ServerPool {
    /// Create a pool. Sticky sessions are on when `sessions` is given.
    pub fn new(
        config: PoolConfig,
        sessions: Option<Arc<dyn SessionRepository>>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let algorithm = config.algorithm;
        Self {
            config,
            state: RwLock::new(PoolState {
                entries: Vec::new(),
                cursor: 0,
                algorithm,
            }),
            sessions,
            events,
        }
    }

    /// Register a backend and return its id.
    pub fn add_server(&self, config: &ServerConfig) -> Result<String, PoolError> {
        if !(config.url.starts_with("http://") || config.url.starts_with("https://")) {
            return Err(PoolError::InvalidUrl(config.url.clone()));
        }

        let id = config
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let entry = ServerEntry::new(id.clone(), config);
        let url = entry.url.clone();
        {
            let mut state = self.state.write();
            if state.entries.iter().any(|e| e.id == id) {
                return Err(PoolError::DuplicateId(id));
            }
            state.entries.push(entry);
        }

        tracing::info!("server added: {} -> {}", id, url);
        self.events.publish(GatewayEvent::ServerAdded {
            id: id.clone(),
            url,
        });
        Ok(id)
    }

    /// Remove a backend. Returns false if the id is unknown.
    pub fn remove_server(&self, id: &str) -> bool {
        let removed = {
            let mut state = self.state.write();
            let before = state.entries.len();
            state.entries.retain(|e| e.id != id);
            before != state.entries.len()
        };

        if removed {
            if let Some(sessions) = &self.sessions {
                sessions.remove_server(id);
            }
            tracing::info!("server removed: {}", id);
            self.events.publish(GatewayEvent::ServerRemoved { id: id.to_string() });
        }
        removed
    }

    /// Select a server for a request.
    ///
    /// A live sticky binding to a still-available entry wins over the
    /// algorithm. The chosen entry's active connection count is
    /// incremented before returning; the caller must pair it with
    /// [`mark_complete`](Self::mark_complete).
    pub fn next_server(&self, ctx: &RequestContext) -> Option<Selection> {
        let mut state = self.state.write();
        let available = LoadBalancer::available_indices(&state.entries);

        if available.is_empty() {
            let total_servers = state.entries.len();
            drop(state);
            tracing::warn!("no servers available ({} registered)", total_servers);
            self.events
                .publish(GatewayEvent::NoServersAvailable { total_servers });
            return None;
        }

        let session_id = self
            .sessions
            .as_ref()
            .and(ctx.session_id.as_deref());

        let sticky_idx = match (&self.sessions, session_id) {
            (Some(sessions), Some(sid)) => sessions.lookup(sid).and_then(|binding| {
                available
                    .iter()
                    .copied()
                    .find(|&i| state.entries[i].id == binding.server_id)
            }),
            _ => None,
        };

        let (idx, sticky) = match sticky_idx {
            Some(idx) => (idx, true),
            None => {
                let algorithm = state.algorithm;
                let mut cursor = state.cursor;
                let picked = {
                    let candidates: Vec<&ServerEntry> =
                        available.iter().map(|&i| &state.entries[i]).collect();
                    LoadBalancer::pick(
                        algorithm,
                        &candidates,
                        ctx,
                        &mut cursor,
                        &mut rand::thread_rng(),
                    )
                }?;
                state.cursor = cursor;
                (available[picked], false)
            }
        };

        let entry = &mut state.entries[idx];
        entry.active_connections += 1;
        entry.total_requests += 1;
        let server = entry.clone();
        let algorithm = state.algorithm;
        drop(state);

        if let (Some(sessions), Some(sid), false) = (&self.sessions, session_id, sticky) {
            sessions.bind(sid, &server.id);
        }

        tracing::debug!(
            "selected {} via {} (sticky: {}, active: {})",
            server.id,
            algorithm,
            sticky,
            server.active_connections
        );
        self.events.publish(GatewayEvent::ServerSelected {
            id: server.id.clone(),
            algorithm,
            sticky,
        });

        Some(Selection { server, sticky })
    }

    /// [`next_server`](Self::next_server) wrapped in a lease that always
    /// gives the connection slot back.
    pub fn acquire(self: &Arc<Self>, ctx: &RequestContext) -> Option<ConnectionLease> {
        let selection = self.next_server(ctx)?;
        Some(ConnectionLease {
            pool: self.clone(),
            server: selection.server,
            sticky: selection.sticky,
            completed: false,
        })
    }

    /// Give back a connection slot without recording an outcome.
    fn release(&self, id: &str) {
        let mut state = self.state.write();
        if let Some(entry) = state.entries.iter_mut().find(|e| e.id == id) {
            entry.active_connections = entry.active_connections.saturating_sub(1);
        }
    }

    /// Report the end of a request dispatched by [`next_server`](Self::next_server).
    ///
    /// Returns false if the server has been removed in the meantime.
    pub fn mark_complete(&self, id: &str, success: bool, response_time_ms: u64) -> bool {
        let transition = {
            let mut state = self.state.write();
            let Some(entry) = state.entries.iter_mut().find(|e| e.id == id) else {
                return false;
            };

            entry.active_connections = entry.active_connections.saturating_sub(1);

            match (success, self.config.failure_coupling) {
                (true, FailureCoupling::Shared) => {
                    entry.record_response_time(response_time_ms);
                    entry.record_success()
                }
                (true, FailureCoupling::Separate) => {
                    entry.record_response_time(response_time_ms);
                    entry.consecutive_request_failures = 0;
                    None
                }
                (false, FailureCoupling::Shared) => {
                    entry.total_failures += 1;
                    entry.record_failure(self.config.max_failures)
                }
                (false, FailureCoupling::Separate) => {
                    entry.total_failures += 1;
                    entry.consecutive_request_failures += 1;
                    None
                }
            }
        };

        if let Some(t) = transition {
            self.publish_transition(id, t, Some("request outcome".to_string()));
        }
        self.events.publish(GatewayEvent::RequestComplete {
            server_id: id.to_string(),
            success,
            response_time_ms,
        });
        true
    }

    /// Store the CPU / memory load last reported for a server.
    pub fn update_resources(&self, id: &str, cpu_usage: f64, memory_usage: f64) -> bool {
        let mut state = self.state.write();
        match state.entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.cpu_usage = cpu_usage.max(0.0);
                entry.memory_usage = memory_usage.max(0.0);
                true
            }
            None => false,
        }
    }

    /// Apply a probe result to an entry's health state machine.
    ///
    /// Returns the transition, if any. Events are left to the caller.
    pub fn apply_probe_result(
        &self,
        id: &str,
        result: &Result<(), ProbeError>,
    ) -> Option<HealthTransition> {
        let mut state = self.state.write();
        let entry = state.entries.iter_mut().find(|e| e.id == id)?;
        entry.last_check = Some(Instant::now());
        match result {
            Ok(()) => entry.record_success(),
            Err(_) => entry.record_failure(self.config.max_failures),
        }
    }

    /// Switch the selection algorithm. Resets the round-robin cursor.
    pub fn set_algorithm(&self, algorithm: Algorithm) -> Algorithm {
        let previous = {
            let mut state = self.state.write();
            let previous = state.algorithm;
            state.algorithm = algorithm;
            state.cursor = 0;
            previous
        };

        if previous != algorithm {
            tracing::info!("algorithm changed: {} -> {}", previous, algorithm);
            self.events.publish(GatewayEvent::AlgorithmChanged {
                from: previous,
                to: algorithm,
            });
        }
        previous
    }

    pub fn algorithm(&self) -> Algorithm {
        self.state.read().algorithm
    }

    pub fn sticky_sessions_enabled(&self) -> bool {
        self.sessions.is_some()
    }

    /// Clone of one entry.
    pub fn get(&self, id: &str) -> Option<ServerEntry> {
        self.state.read().entries.iter().find(|e| e.id == id).cloned()
    }

    /// Clone of every entry, in registration order.
    pub fn entries(&self) -> Vec<ServerEntry> {
        self.state.read().entries.clone()
    }

    /// Serializable views with resource scores.
    pub fn snapshots(&self) -> Vec<ServerSnapshot> {
        let state = self.state.read();
        LoadBalancer::calculate_all_scores(&state.entries)
            .into_iter()
            .zip(state.entries.iter())
            .map(|((_, score), entry)| entry.snapshot(score))
            .collect()
    }

    /// (healthy, degraded, unhealthy)
    pub fn status_counts(&self) -> (usize, usize, usize) {
        let state = self.state.read();
        state.entries.iter().fold((0, 0, 0), |(h, d, u), e| match e.status {
            HealthStatus::Healthy => (h + 1, d, u),
            HealthStatus::Degraded => (h, d + 1, u),
            HealthStatus::Unhealthy => (h, d, u + 1),
        })
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn publish_transition(&self, id: &str, t: HealthTransition, error: Option<String>) {
        match t.to {
            HealthStatus::Healthy => tracing::info!("server {} is now healthy", id),
            HealthStatus::Degraded => tracing::warn!(
                "server {} degraded ({} consecutive failures)",
                id,
                t.consecutive_failures
            ),
            HealthStatus::Unhealthy => tracing::warn!(
                "server {} is now unhealthy ({} consecutive failures)",
                id,
                t.consecutive_failures
            ),
        }
        self.events.publish(GatewayEvent::from_transition(
            id,
            t.from,
            t.to,
            t.consecutive_failures,
            error,
        ));
    }
}
