//! DashMap Session Repository
//!
//! Implements SessionRepository using DashMap for lock-free concurrent access.

use crate::domain::entities::SessionBinding;
use crate::domain::ports::SessionRepository;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// DashMap-backed sticky session store.
///
/// Expired bindings are dropped lazily on lookup and by `purge_expired`,
/// which the gateway runs periodically.
pub struct DashMapSessionRepository {
    bindings: DashMap<String, SessionBinding>,
    ttl: Duration,
}

impl DashMapSessionRepository {
    pub fn new(ttl: Duration) -> Self {
        Self {
            bindings: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_expired(&self, binding: &SessionBinding, now: Instant) -> bool {
        now.duration_since(binding.bound_at) > self.ttl
    }
}

impl SessionRepository for DashMapSessionRepository {
    fn lookup(&self, session_id: &str) -> Option<SessionBinding> {
        let now = Instant::now();
        if self
            .bindings
            .remove_if(session_id, |_, b| self.is_expired(b, now))
            .is_some()
        {
            tracing::debug!("session {} expired", session_id);
            return None;
        }
        self.bindings.get(session_id).map(|e| e.value().clone())
    }

    fn bind(&self, session_id: &str, server_id: &str) {
        self.bindings.insert(
            session_id.to_string(),
            SessionBinding::new(server_id.to_string()),
        );
    }

    fn remove(&self, session_id: &str) -> bool {
        self.bindings.remove(session_id).is_some()
    }

    fn remove_server(&self, server_id: &str) -> usize {
        let before = self.bindings.len();
        self.bindings.retain(|_, b| b.server_id != server_id);
        before.saturating_sub(self.bindings.len())
    }

    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut to_remove = Vec::new();

        for entry in self.bindings.iter() {
            if self.is_expired(entry.value(), now) {
                to_remove.push(entry.key().clone());
            }
        }

        let mut count = 0;
        for key in to_remove {
            if self
                .bindings
                .remove_if(&key, |_, b| self.is_expired(b, now))
                .is_some()
            {
                count += 1;
            }
        }
        count
    }

    fn count(&self) -> usize {
        self.bindings.len()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::sync::Arc;

    // ===== Bind and Lookup Tests =====

    #[test]
    fn test_bind_and_lookup() {
        let repo = DashMapSessionRepository::new(Duration::from_secs(60));
        repo.bind("sess-1", "server-a");

        let binding = repo.lookup("sess-1").unwrap();
        assert_eq!(binding.server_id, "server-a");
        assert!(repo.lookup("sess-2").is_none());
    }

    #[test]
    fn test_rebind_overwrites() {
        let repo = DashMapSessionRepository::new(Duration::from_secs(60));
        repo.bind("sess-1", "server-a");
        let first = repo.lookup("sess-1").unwrap().bound_at;

        std::thread::sleep(Duration::from_millis(5));
        repo.bind("sess-1", "server-b");

        let binding = repo.lookup("sess-1").unwrap();
        assert_eq!(binding.server_id, "server-b");
        assert!(binding.bound_at > first);
        assert_eq!(repo.count(), 1);
    }

    // ===== Expiry Tests =====

    #[test]
    fn test_lookup_expires_lazily() {
        let repo = DashMapSessionRepository::new(Duration::from_millis(20));
        repo.bind("sess-1", "server-a");
        std::thread::sleep(Duration::from_millis(40));

        assert_eq!(repo.count(), 1);
        assert!(repo.lookup("sess-1").is_none());
        assert_eq!(repo.count(), 0);
    }

    #[test]
    fn test_lookup_does_not_refresh() {
        let repo = DashMapSessionRepository::new(Duration::from_millis(50));
        repo.bind("sess-1", "server-a");
        std::thread::sleep(Duration::from_millis(30));
        assert!(repo.lookup("sess-1").is_some());
        std::thread::sleep(Duration::from_millis(30));
        assert!(repo.lookup("sess-1").is_none());
    }

    #[test]
    fn test_purge_expired() {
        let repo = DashMapSessionRepository::new(Duration::from_millis(20));
        repo.bind("old-1", "a");
        repo.bind("old-2", "b");
        std::thread::sleep(Duration::from_millis(40));
        repo.bind("fresh", "a");

        assert_eq!(repo.purge_expired(), 2);
        assert_eq!(repo.count(), 1);
        assert!(repo.lookup("fresh").is_some());
    }

    // ===== Removal Tests =====

    #[test]
    fn test_remove_and_remove_server() {
        let repo = DashMapSessionRepository::new(Duration::from_secs(60));
        repo.bind("s1", "a");
        repo.bind("s2", "a");
        repo.bind("s3", "b");

        assert!(repo.remove("s3"));
        assert!(!repo.remove("s3"));
        assert_eq!(repo.remove_server("a"), 2);
        assert_eq!(repo.count(), 0);
    }

    // ===== Concurrency Tests =====

    #[test]
    fn test_concurrent_binds() {
        use std::thread;

        let repo = Arc::new(DashMapSessionRepository::new(Duration::from_secs(60)));
        let mut handles = vec![];

        for i in 0..10 {
            let repo = repo.clone();
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    repo.bind(&format!("sess-{}-{}", i, j), "server");
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(repo.count(), 1000);
    }
}
