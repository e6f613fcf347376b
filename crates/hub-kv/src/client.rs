//! The `KvClient` trait: the single logical key-value server interface
//! required by every subsystem (spec §4.5).

use async_trait::async_trait;
use hub_core::error::Result;

/// One member of a sorted-set range query: its raw value and its score.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoredMember {
    pub member: String,
    pub score: f64,
}

/// Full KV operation set needed by the pipeline runtime, the cluster
/// coordinator and the stats subsystem: string get/set with TTL, integer
/// increment, hash fields with increment, list push with TTL and max-length
/// trim, set add, sorted-set add/remove-by-score/range, keys-by-pattern,
/// pub/sub, atomic script evaluation, and non-expiring distributed locks
/// with opaque ownership tokens.
#[async_trait]
pub trait KvClient: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<bool>;
    /// Sets `key = value` only if absent (`SET NX`); returns whether it was
    /// set. Used by [`crate::lock::DistributedLock::acquire`].
    async fn set_nx(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<bool>;
    /// Deletes `key` only if its current value equals `expected` (an atomic
    /// compare-and-delete, implemented server-side as a Lua-style script in
    /// a real backend). Used to release a lock without a TOCTOU window.
    async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool>;
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64>;

    async fn hash_incr(&self, key: &str, field: &str, delta: i64) -> Result<i64>;
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>>;
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()>;
    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, String)>>;
    async fn hash_delete(&self, key: &str, field: &str) -> Result<bool>;
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<()>;

    /// Pushes `value` to the front of the list at `key`, trims it to
    /// `max_len` newest entries, and (re-)applies `ttl_secs` to the whole
    /// key.
    async fn list_push_trim(
        &self,
        key: &str,
        value: &str,
        max_len: usize,
        ttl_secs: Option<u64>,
    ) -> Result<()>;
    async fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>>;

    async fn set_add(&self, key: &str, member: &str) -> Result<bool>;
    async fn set_is_member(&self, key: &str, member: &str) -> Result<bool>;

    async fn zset_add(&self, key: &str, member: &str, score: f64) -> Result<()>;
    async fn zset_remove_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<u64>;
    async fn zset_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<ScoredMember>>;
    async fn zset_trim_to_max(&self, key: &str, max_len: usize) -> Result<()>;

    async fn keys_by_pattern(&self, pattern: &str) -> Result<Vec<String>>;

    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;
}
