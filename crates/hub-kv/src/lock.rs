//! Non-expiring-ownership distributed lock with opaque tokens (spec §4.5,
//! §8 invariant 6: "at most one lock holder observes `Acquire → ok` at any
//! instant; a non-holder's `Release` call is a no-op").

use std::time::Duration;

use hub_core::error::Result;
use uuid::Uuid;

use crate::client::KvClient;
use crate::keys_lock;

/// Opaque ownership token returned by a successful [`DistributedLock::acquire`].
/// Only the holder of the matching token can release the lock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub struct DistributedLock<'a, C: KvClient> {
    client: &'a C,
    name: String,
}

impl<'a, C: KvClient> DistributedLock<'a, C> {
    pub fn new(client: &'a C, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
        }
    }

    fn key(&self) -> String {
        keys_lock(&self.name)
    }

    /// Sets the lock key `NX` with `ttl`; returns the opaque token on
    /// success, or `None` if someone else already holds it.
    pub async fn acquire(&self, ttl: Duration) -> Result<Option<LockToken>> {
        let token = Uuid::new_v4().to_string();
        let ok = self
            .client
            .set_nx(&self.key(), &token, Some(ttl.as_secs().max(1)))
            .await?;
        Ok(ok.then(|| LockToken(token)))
    }

    /// Atomically deletes the lock key only if its value still equals
    /// `token`, so a caller that never held the lock (or whose TTL already
    /// expired and was reclaimed by someone else) performs a safe no-op.
    pub async fn release(&self, token: &LockToken) -> Result<()> {
        self.client.delete_if_eq(&self.key(), token.as_str()).await?;
        Ok(())
    }

    /// Retries [`acquire`](Self::acquire) with short sleeps until `timeout`
    /// elapses.
    pub async fn try_acquire(&self, ttl: Duration, timeout: Duration) -> Result<Option<LockToken>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(token) = self.acquire(ttl).await? {
                return Ok(Some(token));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

fn keys_lock(name: &str) -> String {
    hub_core::keys::lock(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryKv;

    #[tokio::test]
    async fn only_one_holder_at_a_time() {
        let kv = InMemoryKv::new();
        let lock_a = DistributedLock::new(&kv, "project:p1");
        let lock_b = DistributedLock::new(&kv, "project:p1");

        let token_a = lock_a
            .acquire(Duration::from_secs(5))
            .await
            .unwrap()
            .expect("first acquire succeeds");
        assert!(lock_b.acquire(Duration::from_secs(5)).await.unwrap().is_none());

        // A non-holder's release is a no-op: it must not free the lock.
        let bogus = LockToken("not-the-real-token".to_string());
        lock_b.release(&bogus).await.unwrap();
        assert!(lock_b.acquire(Duration::from_secs(5)).await.unwrap().is_none());

        lock_a.release(&token_a).await.unwrap();
        assert!(lock_b.acquire(Duration::from_secs(5)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn try_acquire_waits_for_release() {
        let kv = InMemoryKv::new();
        let lock = DistributedLock::new(&kv, "project:p2");
        let token = lock.acquire(Duration::from_secs(5)).await.unwrap().unwrap();

        let kv2 = &kv;
        let release_after = async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            DistributedLock::new(kv2, "project:p2")
                .release(&token)
                .await
                .unwrap();
        };
        let wait_for = DistributedLock::new(&kv, "project:p2")
            .try_acquire(Duration::from_secs(5), Duration::from_millis(200));
        let (_, acquired) = tokio::join!(release_after, wait_for);
        assert!(acquired.unwrap().is_some());
    }
}
