//! In-memory reference implementation of [`KvClient`].
//!
//! Not a production backend — it exists so every other crate's tests run
//! without an external KV server, the same role the teacher's `test_stubs`
//! module plays for its own contracts.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hub_core::error::Result;
use parking_lot::Mutex;

use crate::client::{KvClient, ScoredMember};

#[derive(Clone, Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct Store {
    strings: BTreeMap<String, Entry>,
    hashes: BTreeMap<String, BTreeMap<String, String>>,
    lists: BTreeMap<String, Vec<String>>,
    sets: BTreeMap<String, std::collections::BTreeSet<String>>,
    zsets: BTreeMap<String, BTreeMap<String, f64>>,
}

impl Store {
    fn is_live(entry: &Entry) -> bool {
        entry.expires_at.map(|at| at > Instant::now()).unwrap_or(true)
    }
}

/// A single-process, mutex-guarded stand-in for the KV server.
#[derive(Default)]
pub struct InMemoryKv {
    store: Mutex<Store>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvClient for InMemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut store = self.store.lock();
        match store.strings.get(key).cloned() {
            Some(entry) if Store::is_live(&entry) => Ok(Some(entry.value)),
            Some(_) => {
                store.strings.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<()> {
        let mut store = self.store.lock();
        store.strings.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl_secs.map(|s| Instant::now() + Duration::from_secs(s)),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.store.lock().strings.remove(key).is_some())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<bool> {
        let mut store = self.store.lock();
        let occupied = matches!(store.strings.get(key), Some(e) if Store::is_live(e));
        if occupied {
            return Ok(false);
        }
        store.strings.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl_secs.map(|s| Instant::now() + Duration::from_secs(s)),
            },
        );
        Ok(true)
    }

    async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool> {
        let mut store = self.store.lock();
        let matches = matches!(store.strings.get(key), Some(e) if e.value == expected);
        if matches {
            store.strings.remove(key);
        }
        Ok(matches)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let mut store = self.store.lock();
        let current = store
            .strings
            .get(key)
            .and_then(|e| e.value.parse::<i64>().ok())
            .unwrap_or(0);
        let next = current + delta;
        store.strings.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at: None,
            },
        );
        Ok(next)
    }

    async fn hash_incr(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut store = self.store.lock();
        let hash = store.hashes.entry(key.to_string()).or_default();
        let current = hash
            .get(field)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        let next = current + delta;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        Ok(self
            .store
            .lock()
            .hashes
            .get(key)
            .and_then(|h| h.get(field).cloned()))
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.store
            .lock()
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, String)>> {
        Ok(self
            .store
            .lock()
            .hashes
            .get(key)
            .map(|h| h.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<bool> {
        Ok(self
            .store
            .lock()
            .hashes
            .get_mut(key)
            .map(|h| h.remove(field).is_some())
            .unwrap_or(false))
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<()> {
        if let Some(entry) = self.store.lock().strings.get_mut(key) {
            entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs));
        }
        Ok(())
    }

    async fn list_push_trim(
        &self,
        key: &str,
        value: &str,
        max_len: usize,
        _ttl_secs: Option<u64>,
    ) -> Result<()> {
        let mut store = self.store.lock();
        let list = store.lists.entry(key.to_string()).or_default();
        list.insert(0, value.to_string());
        list.truncate(max_len);
        Ok(())
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let store = self.store.lock();
        let list = match store.lists.get(key) {
            Some(list) => list,
            None => return Ok(Vec::new()),
        };
        let len = list.len() as isize;
        let norm = |i: isize| -> isize {
            if i < 0 {
                (len + i).max(0)
            } else {
                i.min(len)
            }
        };
        let start = norm(start) as usize;
        let stop = (norm(stop) + 1).max(0) as usize;
        if start >= list.len() {
            return Ok(Vec::new());
        }
        Ok(list[start..stop.min(list.len())].to_vec())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool> {
        Ok(self
            .store
            .lock()
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn set_is_member(&self, key: &str, member: &str) -> Result<bool> {
        Ok(self
            .store
            .lock()
            .sets
            .get(key)
            .map(|s| s.contains(member))
            .unwrap_or(false))
    }

    async fn zset_add(&self, key: &str, member: &str, score: f64) -> Result<()> {
        self.store
            .lock()
            .zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zset_remove_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<u64> {
        let mut store = self.store.lock();
        let Some(zset) = store.zsets.get_mut(key) else {
            return Ok(0);
        };
        let before = zset.len();
        zset.retain(|_, score| !(*score >= min && *score <= max));
        Ok((before - zset.len()) as u64)
    }

    async fn zset_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<ScoredMember>> {
        let store = self.store.lock();
        let Some(zset) = store.zsets.get(key) else {
            return Ok(Vec::new());
        };
        let mut out: Vec<ScoredMember> = zset
            .iter()
            .filter(|(_, score)| **score >= min && **score <= max)
            .map(|(member, score)| ScoredMember {
                member: member.clone(),
                score: *score,
            })
            .collect();
        out.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap());
        Ok(out)
    }

    async fn zset_trim_to_max(&self, key: &str, max_len: usize) -> Result<()> {
        let mut store = self.store.lock();
        let Some(zset) = store.zsets.get_mut(key) else {
            return Ok(());
        };
        while zset.len() > max_len {
            if let Some((oldest, _)) = zset
                .iter()
                .min_by(|a, b| a.1.partial_cmp(b.1).unwrap())
                .map(|(m, s)| (m.clone(), *s))
            {
                zset.remove(&oldest);
            } else {
                break;
            }
        }
        Ok(())
    }

    async fn keys_by_pattern(&self, pattern: &str) -> Result<Vec<String>> {
        // A real backend's keyspace is flat across value types (a Redis
        // `KEYS` scan sees strings, hashes, lists, sets and zsets alike), so
        // this stub must search every namespace rather than just strings.
        let prefix = pattern.trim_end_matches('*');
        let store = self.store.lock();
        let matches = |k: &&String| k.starts_with(prefix);
        Ok(store
            .strings
            .keys()
            .filter(matches)
            .chain(store.hashes.keys().filter(matches))
            .chain(store.lists.keys().filter(matches))
            .chain(store.sets.keys().filter(matches))
            .chain(store.zsets.keys().filter(matches))
            .cloned()
            .collect())
    }

    async fn publish(&self, _channel: &str, _payload: &str) -> Result<()> {
        // In-memory stub: no subscribers to fan out to. Production backends
        // implement real pub/sub; the reconciliation loop does not depend on
        // publish succeeding (it polls), so this is a safe no-op for tests.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_nx_enforces_exclusivity() {
        let kv = InMemoryKv::new();
        assert!(kv.set_nx("lock:a", "tok1", None).await.unwrap());
        assert!(!kv.set_nx("lock:a", "tok2", None).await.unwrap());
    }

    #[tokio::test]
    async fn delete_if_eq_is_atomic_compare_and_delete() {
        let kv = InMemoryKv::new();
        kv.set("lock:a", "tok1", None).await.unwrap();
        assert!(!kv.delete_if_eq("lock:a", "tok2").await.unwrap());
        assert!(kv.delete_if_eq("lock:a", "tok1").await.unwrap());
        assert_eq!(kv.get("lock:a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_push_trim_keeps_newest_max_len() {
        let kv = InMemoryKv::new();
        for i in 0..5 {
            kv.list_push_trim("ops", &i.to_string(), 3, None)
                .await
                .unwrap();
        }
        let values = kv.list_range("ops", 0, -1).await.unwrap();
        assert_eq!(values, vec!["4", "3", "2"]);
    }

    #[tokio::test]
    async fn hash_incr_accumulates() {
        let kv = InMemoryKv::new();
        kv.hash_incr("hub:daily_stats:hash:2026-07-26", "n1|p1|x", 5)
            .await
            .unwrap();
        let total = kv
            .hash_incr("hub:daily_stats:hash:2026-07-26", "n1|p1|x", 3)
            .await
            .unwrap();
        assert_eq!(total, 8);
    }
}
