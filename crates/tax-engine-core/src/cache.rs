use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::types::TaxCalculationResponse;

/// Result cache consulted optimistically by the orchestrator: a miss (or an
/// unavailable backend) degrades to direct computation, never to an error.
pub trait ResponseCache: Send + Sync {
    fn get(&self, key: &str) -> Option<TaxCalculationResponse>;
    fn put(&self, key: &str, response: &TaxCalculationResponse);
}

struct CacheEntry {
    response: TaxCalculationResponse,
    stored_at: Instant,
}

/// In-memory cache with a bounded time-to-live and a soft entry cap.
///
/// Entries keyed on a stale rules hash become unreachable as soon as the hash
/// changes; they age out through the TTL sweep rather than explicit purging.
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    max_entries: usize,
}

impl MemoryCache {
    pub fn new(ttl: Duration) -> Self {
        MemoryCache {
            entries: DashMap::new(),
            ttl,
            max_entries: 10_000,
        }
    }

    pub fn with_capacity(ttl: Duration, max_entries: usize) -> Self {
        MemoryCache {
            entries: DashMap::new(),
            ttl,
            max_entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn sweep_expired(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        MemoryCache::new(Duration::from_secs(300))
    }
}

impl ResponseCache for MemoryCache {
    fn get(&self, key: &str) -> Option<TaxCalculationResponse> {
        let entry = self.entries.get(key)?;
        if entry.stored_at.elapsed() >= self.ttl {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(entry.response.clone())
    }

    fn put(&self, key: &str, response: &TaxCalculationResponse) {
        if self.entries.len() >= self.max_entries {
            self.sweep_expired();
            if self.entries.len() >= self.max_entries {
                return;
            }
        }
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                response: response.clone(),
                stored_at: Instant::now(),
            },
        );
    }
}

/// Cache that stores nothing; stands in for an unavailable backend.
pub struct NoopCache;

impl ResponseCache for NoopCache {
    fn get(&self, _key: &str) -> Option<TaxCalculationResponse> {
        None
    }

    fn put(&self, _key: &str, _response: &TaxCalculationResponse) {}
}
