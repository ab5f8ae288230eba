//! Load Balancer Service
//!
//! Pure domain logic for selecting a backend for a request.
//! No locks, no I/O: callers hand in the candidate set, the round-robin
//! cursor and a random source.

use crate::domain::entities::{RequestContext, ServerEntry};
use crate::domain::value_objects::Algorithm;
use rand::Rng;
use std::net::IpAddr;

/// Selection engine for the server pool.
pub struct LoadBalancer;

impl LoadBalancer {
    /// Indices of the entries that may receive traffic: not unhealthy and
    /// below their connection cap.
    pub fn available_indices(servers: &[ServerEntry]) -> Vec<usize> {
        servers
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_available())
            .map(|(i, _)| i)
            .collect()
    }

    /// Pick one candidate with the given algorithm.
    ///
    /// # Arguments
    /// * `algorithm` - Strategy to apply
    /// * `candidates` - The available set, in pool order
    /// * `ctx` - Caller IP and session (only `IpHash` looks at it)
    /// * `cursor` - Round-robin position, persisted by the caller
    /// * `rng` - Random source for weighted/random/ip-hash fallback
    ///
    /// # Returns
    /// Index into `candidates`, or None if it is empty
    ///
    /// # Example
    /// ```ignore
    /// let idx = LoadBalancer::pick(
    ///     Algorithm::LeastConnections,
    ///     &candidates,
    ///     &RequestContext::default(),
    ///     &mut cursor,
    ///     &mut rand::thread_rng(),
    /// );
    /// ```
    pub fn pick<R: Rng>(
        algorithm: Algorithm,
        candidates: &[&ServerEntry],
        ctx: &RequestContext,
        cursor: &mut usize,
        rng: &mut R,
    ) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }

        let idx = match algorithm {
            Algorithm::RoundRobin => Self::round_robin(candidates.len(), cursor),
            Algorithm::LeastConnections => {
                Self::min_by_key(candidates, |s| s.active_connections as f64)
            }
            Algorithm::WeightedRoundRobin => Self::weighted(candidates, rng),
            Algorithm::IpHash => match ctx.client_ip {
                Some(ip) => Self::hash_ip(&ip) as usize % candidates.len(),
                None => rng.gen_range(0..candidates.len()),
            },
            Algorithm::Random => rng.gen_range(0..candidates.len()),
            Algorithm::LeastResponseTime => Self::min_by_key(candidates, |s| s.avg_response_time()),
            Algorithm::ResourceBased => Self::max_by_score(candidates),
        };

        Some(idx)
    }

    fn round_robin(len: usize, cursor: &mut usize) -> usize {
        let idx = *cursor % len;
        *cursor = (idx + 1) % len;
        idx
    }

    /// First-seen wins ties.
    fn min_by_key<F>(candidates: &[&ServerEntry], key: F) -> usize
    where
        F: Fn(&ServerEntry) -> f64,
    {
        let mut best = (0, key(candidates[0]));
        for (i, server) in candidates.iter().enumerate().skip(1) {
            let value = key(*server);
            if value < best.1 {
                best = (i, value);
            }
        }
        best.0
    }

    /// First-seen wins ties.
    fn max_by_score(candidates: &[&ServerEntry]) -> usize {
        let mut best = (0, Self::resource_score(candidates[0]));
        for (i, server) in candidates.iter().enumerate().skip(1) {
            let score = Self::resource_score(server);
            if score > best.1 {
                best = (i, score);
            }
        }
        best.0
    }

    /// Cumulative-weight scan against `random() * totalWeight`.
    fn weighted<R: Rng>(candidates: &[&ServerEntry], rng: &mut R) -> usize {
        let total: u64 = candidates.iter().map(|s| s.weight.max(1) as u64).sum();
        let draw = rng.gen::<f64>() * total as f64;

        let mut cumulative = 0.0;
        for (i, server) in candidates.iter().enumerate() {
            cumulative += server.weight.max(1) as f64;
            if draw < cumulative {
                return i;
            }
        }
        candidates.len() - 1
    }

    /// Stable across processes and restarts (CRC-32 of the textual address).
    pub fn hash_ip(ip: &IpAddr) -> u32 {
        crc32fast::hash(ip.to_string().as_bytes())
    }

    /// Composite score used by the resource-based strategy. Higher is better.
    ///
    /// Starts at 100 and subtracts:
    /// - up to 30 for connection load (active / max)
    /// - up to 30 for average response time (1 point per 100ms)
    /// - up to 20 for consecutive failures (5 points each)
    /// - 0.1 per CPU and memory percent
    ///
    /// The result is multiplied by the weight and floored at 0.
    pub fn resource_score(server: &ServerEntry) -> f64 {
        let failures = server
            .consecutive_failures
            .saturating_add(server.consecutive_request_failures) as f64;

        let mut score = 100.0;
        score -= (30.0 * server.connection_load()).min(30.0);
        score -= (server.avg_response_time() / 100.0).min(30.0);
        score -= (5.0 * failures).min(20.0);
        score -= 0.1 * server.cpu_usage;
        score -= 0.1 * server.memory_usage;

        (score * server.weight.max(1) as f64).max(0.0)
    }

    /// Resource scores for every entry, available or not (for the admin API).
    pub fn calculate_all_scores(servers: &[ServerEntry]) -> Vec<(String, f64)> {
        servers
            .iter()
            .map(|s| (s.id.clone(), Self::resource_score(s)))
            .collect()
    }
}
