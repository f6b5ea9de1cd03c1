//! In-process LRU cache with lazy TTL expiry

use super::{CacheError, CacheStats, CacheStore, MAX_ENTRY_TTL};
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Arc<[u8]>,
    expires_at: Instant,
}

/// LRU-bounded byte cache
///
/// Each entry is published as one immutable buffer, so a concurrent reader
/// sees either the old value or the new one, never a mix.
pub struct MemoryCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    /// * `capacity` - Maximum number of live keys; zero is raised to one
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub async fn invalidate(&self, key: &str) -> bool {
        self.entries.lock().await.pop(key).is_some()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Drop every expired entry (lookups already ignore them)
    pub async fn prune_expired(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut entries = self.entries.lock().await;

        let live = match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        };
        drop(entries);

        match live {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value.to_vec()))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let entry = CacheEntry {
            value: Arc::from(value),
            expires_at: Instant::now() + ttl.min(MAX_ENTRY_TTL),
        };
        self.entries.lock().await.put(key.to_string(), entry);
        Ok(())
    }

    async fn stats(&self) -> Option<CacheStats> {
        Some(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len().await,
        })
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip() {
        let cache = MemoryCache::new(16);
        cache
            .set("k1", b"hello".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(cache.get("k1").await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(cache.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_huge_ttl_is_clamped() {
        let cache = MemoryCache::new(8);
        cache
            .set("k", b"v".to_vec(), Duration::from_secs(u64::MAX))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_reads_as_miss() {
        let cache = MemoryCache::new(16);
        cache
            .set("k1", b"v".to_vec(), Duration::from_millis(100))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(99)).await;
        assert!(cache.get("k1").await.unwrap().is_some());

        tokio::time::advance(Duration::from_millis(2)).await;
        assert!(cache.get("k1").await.unwrap().is_none());
        assert_eq!(cache.len().await, 0, "expired entry removed on read");
    }

    #[tokio::test]
    async fn test_overwrite_replaces_value() {
        let cache = MemoryCache::new(16);
        let ttl = Duration::from_secs(60);
        cache.set("k", b"old".to_vec(), ttl).await.unwrap();
        cache.set("k", b"new".to_vec(), ttl).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"new".to_vec()));
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let cache = MemoryCache::new(2);
        let ttl = Duration::from_secs(60);

        cache.set("k1", b"1".to_vec(), ttl).await.unwrap();
        cache.set("k2", b"2".to_vec(), ttl).await.unwrap();
        cache.set("k3", b"3".to_vec(), ttl).await.unwrap(); // Evicts k1

        assert!(cache.get("k1").await.unwrap().is_none());
        assert!(cache.get("k2").await.unwrap().is_some());
        assert!(cache.get("k3").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_hit_miss_counters() {
        let cache = MemoryCache::new(4);
        assert_eq!(cache.stats().await.unwrap().hit_ratio(), None);

        cache
            .set("k", b"v".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        cache.get("k").await.unwrap();
        cache.get("nope").await.unwrap();

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hit_ratio(), Some(0.5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_expired() {
        let cache = MemoryCache::new(8);
        cache
            .set("short", b"s".to_vec(), Duration::from_millis(10))
            .await
            .unwrap();
        cache
            .set("long", b"l".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(cache.prune_expired().await, 1);
        assert_eq!(cache.len().await, 1);
        assert!(cache.invalidate("long").await);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_zero_capacity_clamped() {
        let cache = MemoryCache::new(0);
        cache
            .set("k", b"v".to_vec(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(cache.len().await, 1);
    }
}
