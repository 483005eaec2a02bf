//! TTL 缓存
//!
//! 每个条目带创建时间、TTL 与命中计数：
//! - get 命中过期条目视为未命中并顺带删除（惰性过期）
//! - cleanup 一次性清掉所有过期条目，由 spawn_cleanup 启动的后台任务周期调用
//! - 容量满时插入新 key，淘汰「命中数 / 存活秒数」最低的一个条目

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 缓存条目
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub created_at: Instant,
    pub ttl: Duration,
    pub hits: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }

    /// 使用频率：命中数 / 存活秒数（存活时间下限 1ms，避免除零）
    fn usage_score(&self, now: Instant) -> f64 {
        let age_secs = now
            .saturating_duration_since(self.created_at)
            .as_secs_f64()
            .max(0.001);
        self.hits as f64 / age_secs
    }
}

/// 缓存统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

/// 带 TTL 与容量上限的键值缓存
pub struct TtlCache<V> {
    name: String,
    max_entries: usize,
    default_ttl: Duration,
    inner: RwLock<CacheInner<V>>,
}

impl<V: Clone + Send + Sync + 'static> TtlCache<V> {
    pub fn new(name: impl Into<String>, max_entries: usize, default_ttl: Duration) -> Self {
        Self {
            name: name.into(),
            max_entries: max_entries.max(1),
            default_ttl,
            inner: RwLock::new(CacheInner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
                evictions: 0,
                expirations: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// 读取；过期条目视为未命中并删除
    pub async fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;

        let expired = match inner.entries.get_mut(key) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(entry) if entry.is_expired(now) => true,
            Some(entry) => {
                entry.hits += 1;
                let value = entry.value.clone();
                inner.hits += 1;
                return Some(value);
            }
        };

        if expired {
            inner.entries.remove(key);
            inner.expirations += 1;
            inner.misses += 1;
        }
        None
    }

    /// 按默认 TTL 写入
    pub async fn insert(&self, key: impl Into<String>, value: V) {
        self.set(key, value, self.default_ttl).await;
    }

    /// 写入；容量已满且为新 key 时先淘汰一个使用频率最低的条目
    pub async fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let now = Instant::now();
        let mut inner = self.inner.write().await;

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.max_entries {
            let victim = inner
                .entries
                .values()
                .min_by(|a, b| a.usage_score(now).total_cmp(&b.usage_score(now)))
                .map(|entry| entry.key.clone());
            if let Some(victim) = victim {
                inner.entries.remove(&victim);
                inner.evictions += 1;
                tracing::debug!(cache = %self.name, key = %victim, "evicted least-used entry");
            }
        }

        inner.entries.insert(
            key.clone(),
            CacheEntry {
                key,
                value,
                created_at: now,
                ttl,
                hits: 0,
            },
        );
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.inner.write().await.entries.remove(key).is_some()
    }

    pub async fn clear(&self) {
        self.inner.write().await.entries.clear();
    }

    /// 清除所有过期条目，返回清除数量
    pub async fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - inner.entries.len();
        inner.expirations += removed as u64;
        removed
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.read().await;
        CacheStats {
            size: inner.entries.len(),
            capacity: self.max_entries,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            expirations: inner.expirations,
        }
    }

    /// 启动周期清理任务，token 取消后退出
    pub fn spawn_cleanup(self: &Arc<Self>, every: Duration, token: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = cache.cleanup().await;
                        if removed > 0 {
                            tracing::debug!(cache = %cache.name, removed, "swept expired entries");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_get_after_ttl_is_miss() {
        let cache = TtlCache::new("test", 10, Duration::from_secs(60));
        cache.set("k", 1u32, Duration::from_millis(500)).await;

        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(cache.get("k").await, Some(1));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get("k").await, None);
        assert!(cache.is_empty().await);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_picks_least_used() {
        let cache = TtlCache::new("test", 2, Duration::from_secs(60));
        cache.insert("hot", 1u32).await;
        cache.insert("cold", 2u32).await;

        tokio::time::advance(Duration::from_secs(1)).await;
        for _ in 0..5 {
            assert!(cache.get("hot").await.is_some());
        }

        cache.insert("new", 3u32).await;
        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get("cold").await, None);
        assert_eq!(cache.get("hot").await, Some(1));
        assert_eq!(cache.get("new").await, Some(3));
        assert_eq!(cache.stats().await.evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_existing_key_does_not_evict() {
        let cache = TtlCache::new("test", 1, Duration::from_secs(60));
        cache.insert("a", 1u32).await;
        cache.insert("a", 2u32).await;
        assert_eq!(cache.get("a").await, Some(2));
        assert_eq!(cache.stats().await.evictions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_removes_only_expired() {
        let cache = TtlCache::new("test", 10, Duration::from_secs(60));
        cache.set("short", 1u32, Duration::from_secs(1)).await;
        cache.set("long", 2u32, Duration::from_secs(10)).await;

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.cleanup().await, 1);
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("long").await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_and_clear() {
        let cache = TtlCache::new("test", 10, Duration::from_secs(60));
        cache.insert("a", 1u32).await;
        cache.insert("b", 2u32).await;
        assert!(cache.delete("a").await);
        assert!(!cache.delete("a").await);
        cache.clear().await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweep() {
        let cache = Arc::new(TtlCache::new("test", 10, Duration::from_secs(60)));
        cache.set("a", 1u32, Duration::from_secs(1)).await;

        let token = CancellationToken::new();
        let handle = cache.spawn_cleanup(Duration::from_secs(5), token.clone());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(cache.len().await, 0);

        token.cancel();
        handle.await.unwrap();
    }
}
