use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

pub use crate::config::CacheConfig;

/// Cache performance statistics
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate hit rate as percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Value,
    created_at: Instant,
    ttl: Duration,
    access_count: u64,
    /// Insertion order, breaks access-count ties during eviction
    seq: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) > self.ttl
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    stats: CacheStats,
    next_seq: u64,
}

/// TTL cache for read-mostly responses (status, health, comparison summaries).
///
/// When full, the entries with the fewest hits are dropped in one sweep.
pub struct ResponseCache {
    config: CacheConfig,
    inner: Mutex<CacheInner>,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let now = Instant::now();

        let expired = match inner.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.access_count += 1;
                let payload = entry.payload.clone();
                inner.stats.hits += 1;
                return Some(payload);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            inner.entries.remove(key);
            debug!(key = %key, "Cache entry expired");
        }
        inner.stats.misses += 1;
        None
    }

    pub async fn put(&self, key: impl Into<String>, payload: Value, ttl: Duration) {
        let key = key.into();
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.config.max_entries {
            let evicted = Self::evict_least_accessed(inner, self.config.eviction_batch);
            debug!(evicted, "Cache full, evicted least accessed entries");
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            key,
            CacheEntry {
                payload,
                created_at: Instant::now(),
                ttl,
                access_count: 0,
                seq,
            },
        );
    }

    /// Drop the `count` entries with the lowest access count, oldest first on ties
    fn evict_least_accessed(inner: &mut CacheInner, count: usize) -> usize {
        let mut candidates: Vec<(String, u64, u64)> = inner
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.access_count, e.seq))
            .collect();
        candidates.sort_by(|a, b| a.1.cmp(&b.1).then(a.2.cmp(&b.2)));

        let victims: Vec<String> = candidates.into_iter().take(count).map(|c| c.0).collect();
        for key in &victims {
            inner.entries.remove(key);
        }
        inner.stats.evictions += victims.len() as u64;
        victims.len()
    }

    /// Remove every expired entry
    pub async fn purge_expired(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let before = inner.entries.len();
        inner.entries.retain(|_, e| !e.is_expired(now));
        before - inner.entries.len()
    }

    pub async fn invalidate(&self, key: &str) {
        self.inner.lock().await.entries.remove(key);
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        CacheStats {
            entries: inner.entries.len(),
            ..inner.stats.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_hit_then_expiry_removes_entry() {
        let cache = ResponseCache::new(CacheConfig::default());
        cache
            .put("status", json!({"ok": true}), Duration::from_millis(50))
            .await;

        assert_eq!(cache.get("status").await, Some(json!({"ok": true})));

        sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.get("status").await, None);
        assert!(cache.is_empty().await);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_purge_drops_only_expired_entries() {
        let cache = ResponseCache::new(CacheConfig::default());
        cache.put("short", json!(1), Duration::from_millis(20)).await;
        cache.put("long", json!(2), Duration::from_secs(60)).await;

        sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("long").await, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_miss_on_absent_key() {
        let cache = ResponseCache::new(CacheConfig::default());
        assert!(cache.get("nothing").await.is_none());
        assert_eq!(cache.stats().await.hit_rate(), 0.0);
    }

    #[tokio::test]
    async fn test_1001_insertions_leave_901_entries() {
        let cache = ResponseCache::new(CacheConfig::default());
        for i in 0..1001 {
            cache
                .put(format!("k{}", i), json!(i), Duration::from_secs(60))
                .await;
        }

        assert_eq!(cache.len().await, 901);
        assert_eq!(cache.stats().await.evictions, 100);
        // The last insert survives the sweep
        assert_eq!(cache.get("k1000").await, Some(json!(1000)));
    }

    #[tokio::test]
    async fn test_eviction_spares_frequently_read_entries() {
        let config = CacheConfig {
            max_entries: 10,
            eviction_batch: 3,
            ..Default::default()
        };
        let cache = ResponseCache::new(config);
        for i in 0..10 {
            cache
                .put(format!("k{}", i), json!(i), Duration::from_secs(60))
                .await;
        }
        for _ in 0..3 {
            cache.get("k0").await;
            cache.get("k1").await;
        }

        cache.put("fresh", json!("x"), Duration::from_secs(60)).await;

        assert_eq!(cache.len().await, 8);
        assert!(cache.get("k0").await.is_some());
        assert!(cache.get("k1").await.is_some());
        assert!(cache.get("k2").await.is_none());
        assert!(cache.get("k3").await.is_none());
        assert!(cache.get("k4").await.is_none());
    }

    #[tokio::test]
    async fn test_overwrite_does_not_evict() {
        let config = CacheConfig {
            max_entries: 2,
            eviction_batch: 1,
            ..Default::default()
        };
        let cache = ResponseCache::new(config);
        cache.put("a", json!(1), Duration::from_secs(60)).await;
        cache.put("b", json!(2), Duration::from_secs(60)).await;
        cache.put("a", json!(3), Duration::from_secs(60)).await;

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get("a").await, Some(json!(3)));
    }
}
