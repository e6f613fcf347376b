//! `ResilientClient<C>`: wraps any [`KvClient`] with the three-stage
//! resilience wrapper from spec §4.5 — circuit breaker, retry, and a small
//! local read cache used only on read failures while the breaker is open.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use hub_core::error::{HubError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::circuit::CircuitBreaker;
use crate::client::{KvClient, ScoredMember};
use crate::retry::RetryPolicy;

#[derive(Clone, Copy, Debug)]
pub struct ResilientConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub retry: RetryPolicy,
    pub read_cache_ttl: Duration,
}

impl Default for ResilientConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            read_cache_ttl: Duration::from_secs(30),
        }
    }
}

struct CachedRead {
    value: Option<String>,
    cached_at: Instant,
}

/// A bounded, time-limited view of the last successfully observed value per
/// key. Consulted only when the breaker is open and the live call fails —
/// never used to short-circuit a healthy client.
#[derive(Default)]
struct ReadCache {
    entries: Mutex<HashMap<String, CachedRead>>,
}

impl ReadCache {
    fn remember(&self, key: &str, value: Option<String>) {
        self.entries.lock().insert(
            key.to_string(),
            CachedRead {
                value,
                cached_at: Instant::now(),
            },
        );
    }

    fn recall(&self, key: &str, ttl: Duration) -> Option<Option<String>> {
        let entries = self.entries.lock();
        entries.get(key).and_then(|entry| {
            if entry.cached_at.elapsed() <= ttl {
                Some(entry.value.clone())
            } else {
                None
            }
        })
    }
}

pub struct ResilientClient<C: KvClient> {
    inner: C,
    breaker: CircuitBreaker,
    config: ResilientConfig,
    cache: ReadCache,
}

impl<C: KvClient> ResilientClient<C> {
    pub fn new(inner: C, config: ResilientConfig) -> Self {
        Self {
            breaker: CircuitBreaker::new(config.failure_threshold, config.reset_timeout),
            inner,
            config,
            cache: ReadCache::default(),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn circuit_state(&self) -> crate::circuit::CircuitState {
        self.breaker.state()
    }

    /// Runs `op` through the breaker-gated retry wrapper: if the breaker is
    /// open the call is rejected immediately as [`HubError::transient`]
    /// without ever touching `inner`.
    async fn guarded<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        if !self.breaker.allow_call() {
            return Err(HubError::transient("circuit breaker open"));
        }
        let result = self
            .config
            .retry
            .run(|| async {
                match op().await {
                    Ok(value) => Ok(value),
                    Err(err) => Err(err),
                }
            })
            .await;
        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(_) => self.breaker.record_failure(),
        }
        result
    }
}

#[async_trait]
impl<C: KvClient> KvClient for ResilientClient<C> {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.guarded(|| self.inner.get(key)).await {
            Ok(value) => {
                self.cache.remember(key, value.clone());
                Ok(value)
            }
            Err(err) => {
                if let Some(cached) = self.cache.recall(key, self.config.read_cache_ttl) {
                    tracing::warn!(key, "serving stale cached read while KV is degraded");
                    return Ok(cached);
                }
                Err(err)
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<()> {
        self.guarded(|| self.inner.set(key, value, ttl_secs)).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.guarded(|| self.inner.delete(key)).await
    }

    async fn set_nx(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<bool> {
        self.guarded(|| self.inner.set_nx(key, value, ttl_secs))
            .await
    }

    async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool> {
        self.guarded(|| self.inner.delete_if_eq(key, expected))
            .await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.guarded(|| self.inner.incr_by(key, delta)).await
    }

    async fn hash_incr(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        self.guarded(|| self.inner.hash_incr(key, field, delta))
            .await
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        let cache_key = format!("{key}#{field}");
        match self.guarded(|| self.inner.hash_get(key, field)).await {
            Ok(value) => {
                self.cache.remember(&cache_key, value.clone());
                Ok(value)
            }
            Err(err) => {
                if let Some(cached) = self.cache.recall(&cache_key, self.config.read_cache_ttl) {
                    return Ok(cached);
                }
                Err(err)
            }
        }
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.guarded(|| self.inner.hash_set(key, field, value))
            .await
    }

    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, String)>> {
        self.guarded(|| self.inner.hash_get_all(key)).await
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<bool> {
        self.guarded(|| self.inner.hash_delete(key, field)).await
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<()> {
        self.guarded(|| self.inner.expire(key, ttl_secs)).await
    }

    async fn list_push_trim(
        &self,
        key: &str,
        value: &str,
        max_len: usize,
        ttl_secs: Option<u64>,
    ) -> Result<()> {
        self.guarded(|| self.inner.list_push_trim(key, value, max_len, ttl_secs))
            .await
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        self.guarded(|| self.inner.list_range(key, start, stop))
            .await
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool> {
        self.guarded(|| self.inner.set_add(key, member)).await
    }

    async fn set_is_member(&self, key: &str, member: &str) -> Result<bool> {
        self.guarded(|| self.inner.set_is_member(key, member)).await
    }

    async fn zset_add(&self, key: &str, member: &str, score: f64) -> Result<()> {
        self.guarded(|| self.inner.zset_add(key, member, score))
            .await
    }

    async fn zset_remove_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<u64> {
        self.guarded(|| self.inner.zset_remove_range_by_score(key, min, max))
            .await
    }

    async fn zset_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<ScoredMember>> {
        self.guarded(|| self.inner.zset_range_by_score(key, min, max))
            .await
    }

    async fn zset_trim_to_max(&self, key: &str, max_len: usize) -> Result<()> {
        self.guarded(|| self.inner.zset_trim_to_max(key, max_len))
            .await
    }

    async fn keys_by_pattern(&self, pattern: &str) -> Result<Vec<String>> {
        self.guarded(|| self.inner.keys_by_pattern(pattern)).await
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        self.guarded(|| self.inner.publish(channel, payload)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryKv;

    #[tokio::test]
    async fn healthy_path_delegates_and_caches() {
        let client = ResilientClient::new(InMemoryKv::new(), ResilientConfig::default());
        client.set("k", "v1", None).await.unwrap();
        assert_eq!(client.get("k").await.unwrap(), Some("v1".to_string()));
    }
}
