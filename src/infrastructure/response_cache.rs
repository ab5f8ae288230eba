//! Response Cache
//!
//! Time- and size-bounded store of upstream responses keyed by a request
//! fingerprint. Eviction removes the entry with the oldest last access.

use crate::domain::entities::{RequestDescriptor, ResponseDescriptor, TENANT_HEADER};
use crate::infrastructure::shutdown::ShutdownController;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Whether the gateway consults the cache at all
    pub enabled: bool,
    /// TTL when neither the caller nor the response supplies one
    pub default_ttl: Duration,
    /// Maximum number of entries
    pub max_size: usize,
    /// Interval of the expiry sweep
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl: Duration::from_secs(300),
            max_size: 1000,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    response: ResponseDescriptor,
    /// Request path, for prefix invalidation
    path: String,
    created_at: Instant,
    expires_at: Instant,
    hits: u64,
    last_access: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

/// Cache statistics.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    /// Entries dropped to make room
    pub evictions: u64,
    /// Entries dropped because their TTL elapsed
    pub expirations: u64,
    pub size: usize,
    pub max_size: usize,
    /// Percent of lookups that were hits
    pub hit_rate: f64,
}

/// In-memory response cache.
pub struct ResponseCache {
    config: CacheConfig,
    entries: Mutex<HashMap<String, CacheEntry>>,
    counters: CacheCounters,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
            counters: CacheCounters::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Deterministic fingerprint of a request.
    ///
    /// Covers method, path, sorted query parameters, the tenant header and
    /// whether an `Authorization` header is present. The credential itself
    /// never enters the key.
    pub fn fingerprint(req: &RequestDescriptor) -> String {
        let query = req
            .sorted_query_pairs()
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        let tenant = req.header(TENANT_HEADER).unwrap_or("");
        let auth = if req.header("authorization").is_some() {
            "auth"
        } else {
            "anon"
        };

        let mut hasher = Sha256::new();
        for part in [req.method.as_str(), req.path.as_str(), query.as_str(), tenant, auth] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }

    /// Whether a request/response pair may be stored.
    ///
    /// Only GET and HEAD, only 2xx, never a response that sets a cookie,
    /// and never when the response's `Cache-Control` carries `no-cache`,
    /// `no-store` or `private`.
    pub fn should_cache(req: &RequestDescriptor, resp: &ResponseDescriptor) -> bool {
        if req.method != "GET" && req.method != "HEAD" {
            return false;
        }
        if !resp.is_success() {
            return false;
        }
        // a cookie belongs to one client, never to the fingerprint
        if resp.header("set-cookie").is_some() {
            return false;
        }
        !cache_directives(resp)
            .any(|d| d == "no-cache" || d == "no-store" || d == "private")
    }

    /// TTL for a response: explicit value, then `max-age`, then a future
    /// `Expires`, then the configured default.
    pub fn resolve_ttl(&self, explicit: Option<Duration>, resp: &ResponseDescriptor) -> Duration {
        if let Some(ttl) = explicit {
            return ttl;
        }

        let max_age = cache_directives(resp).find_map(|d| {
            d.strip_prefix("max-age=")
                .and_then(|secs| secs.trim_matches('"').parse::<u64>().ok())
        });
        if let Some(secs) = max_age {
            return Duration::from_secs(secs);
        }

        if let Some(expires) = resp
            .header("expires")
            .and_then(|v| chrono::DateTime::parse_from_rfc2822(v.trim()).ok())
        {
            let remaining = expires.with_timezone(&chrono::Utc) - chrono::Utc::now();
            if let Ok(remaining) = remaining.to_std() {
                if !remaining.is_zero() {
                    return remaining;
                }
            }
        }

        self.config.default_ttl
    }

    /// Look up a fingerprint. Expired entries are removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<ResponseDescriptor> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let expired = match entries.get(key) {
            Some(entry) => entry.is_expired(now),
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if expired {
            entries.remove(key);
            self.counters.expirations.fetch_add(1, Ordering::Relaxed);
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let entry = entries.get_mut(key)?;
        entry.hits += 1;
        entry.last_access = now;
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.response.clone())
    }

    /// Store a response under `key`.
    ///
    /// `ttl` overrides the directives on the response. A resolved TTL of
    /// zero stores nothing. Returns whether the entry was stored.
    pub fn set(
        &self,
        key: &str,
        path: &str,
        response: ResponseDescriptor,
        ttl: Option<Duration>,
    ) -> bool {
        let ttl = self.resolve_ttl(ttl, &response);
        if ttl.is_zero() || self.config.max_size == 0 {
            return false;
        }

        let now = Instant::now();
        let mut entries = self.entries.lock();

        if !entries.contains_key(key) {
            while entries.len() >= self.config.max_size {
                if !self.evict_oldest(&mut entries) {
                    break;
                }
            }
        }

        entries.insert(
            key.to_string(),
            CacheEntry {
                response,
                path: path.to_string(),
                created_at: now,
                expires_at: now + ttl,
                hits: 0,
                last_access: now,
            },
        );
        self.counters.sets.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn evict_oldest(&self, entries: &mut HashMap<String, CacheEntry>) -> bool {
        let oldest = entries
            .iter()
            .min_by_key(|(_, e)| e.last_access)
            .map(|(k, _)| k.clone());

        match oldest {
            Some(key) => {
                entries.remove(&key);
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("cache evicted {}", key);
                true
            }
            None => false,
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        let removed = self.entries.lock().remove(key).is_some();
        if removed {
            self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Remove every entry. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        self.counters
            .deletes
            .fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    /// Remove entries whose request path starts with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| !e.path.starts_with(prefix));
        let removed = before - entries.len();
        self.counters
            .deletes
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Drop every expired entry regardless of access pattern.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        let removed = before - entries.len();
        self.counters
            .expirations
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Age and hit count of an entry, if present.
    pub fn entry_info(&self, key: &str) -> Option<(Duration, u64)> {
        self.entries
            .lock()
            .get(key)
            .map(|e| (e.created_at.elapsed(), e.hits))
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64 * 100.0
        };

        CacheStats {
            hits,
            misses,
            sets: self.counters.sets.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            size: self.len(),
            max_size: self.config.max_size,
            hit_rate,
        }
    }

    /// Start the periodic expiry sweep.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub fn start_sweeper(self: Arc<Self>, shutdown: ShutdownController) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.cleanup_interval);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let removed = self.purge_expired();
                        if removed > 0 {
                            tracing::debug!("cache sweep removed {} expired entries", removed);
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        })
    }
}

/// Lower-cased `Cache-Control` directives of a response.
fn cache_directives(resp: &ResponseDescriptor) -> impl Iterator<Item = String> + '_ {
    resp.header("cache-control")
        .unwrap_or("")
        .split(',')
        .map(|d| d.trim().to_lowercase())
        .filter(|d| !d.is_empty())
}
