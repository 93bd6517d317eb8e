//! Logging setup and statement-shape tracking.

use std::collections::HashSet;

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the JSON tracing subscriber, honouring `RUST_LOG`.
pub fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Short, stable identifier of a SQL text.
pub fn query_hash(sql: &str) -> String {
    let digest = Sha256::digest(sql.as_bytes());
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Result of observing one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryShape {
    pub hash: String,
    /// True the first time this SQL text is seen
    pub first_seen: bool,
}

/// Bounded set of statement hashes already logged in full.
///
/// Owned by the [`Database`](crate::db::Database) handle and shared with its
/// repositories. Readers only take the read lock; the write lock is taken
/// when a new hash is inserted. Once `capacity` hashes are known, new shapes
/// are no longer remembered.
#[derive(Debug)]
pub struct QueryHashCache {
    capacity: usize,
    seen: RwLock<HashSet<String>>,
}

impl QueryHashCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            seen: RwLock::new(HashSet::new()),
        }
    }

    pub fn observe(&self, sql: &str) -> QueryShape {
        let hash = query_hash(sql);
        if self.seen.read().contains(&hash) {
            return QueryShape {
                hash,
                first_seen: false,
            };
        }

        let mut seen = self.seen.write();
        let first_seen = seen.len() < self.capacity && seen.insert(hash.clone());
        QueryShape { hash, first_seen }
    }

    pub fn len(&self) -> usize {
        self.seen.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for QueryHashCache {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable() {
        let a = query_hash("SELECT 1");
        assert_eq!(a, query_hash("SELECT 1"));
        assert_ne!(a, query_hash("SELECT 2"));
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_first_seen_once() {
        let cache = QueryHashCache::new(10);
        assert!(cache.observe("SELECT 1").first_seen);
        assert!(!cache.observe("SELECT 1").first_seen);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_capacity_bound() {
        let cache = QueryHashCache::new(2);
        assert!(cache.observe("a").first_seen);
        assert!(cache.observe("b").first_seen);
        assert!(!cache.observe("c").first_seen);
        assert!(!cache.observe("c").first_seen);
        assert_eq!(cache.len(), 2);
    }
}
