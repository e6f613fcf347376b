//! Named bounded reservoirs keyed by `(samplerName, PNS)` (spec §4.4, §6):
//! rate-limited admission via a bitmask over a per-PNS counter, with the
//! first record for a PNS always forced through so new pipelines show
//! something immediately instead of waiting for the 64th message.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hub_core::error::Result;
use hub_kv::KvClient;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

fn content_hash(payload: &str) -> String {
    hex::encode(Sha256::digest(payload.as_bytes()))
}

/// A sampler admits roughly `1 / (mask + 1)` of the records it sees per
/// PNS, always admitting the first. Mask must be `2^n - 1` so the bitmask
/// check is exact.
pub struct Sampler<C: KvClient> {
    client: Arc<C>,
    name: String,
    admit_mask: u64,
    max_len: usize,
    ttl: Duration,
    counters: Mutex<HashMap<String, u64>>,
}

impl<C: KvClient> Sampler<C> {
    /// `rate_denominator` must be a power of two (e.g. 64 for the spec's
    /// default ≈1/64 rate).
    pub fn new(
        client: Arc<C>,
        name: impl Into<String>,
        rate_denominator: u64,
        max_len: usize,
        ttl: Duration,
    ) -> Self {
        debug_assert!(rate_denominator.is_power_of_two());
        Self {
            client,
            name: name.into(),
            admit_mask: rate_denominator.saturating_sub(1),
            max_len,
            ttl,
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_default_rate(client: Arc<C>, name: impl Into<String>) -> Self {
        Self::new(
            client,
            name,
            64,
            hub_core::keys::retention::DEFAULT_SAMPLE_MAX,
            Duration::from_secs(hub_core::keys::retention::DEFAULT_SAMPLE_TTL_SECS),
        )
    }

    fn should_admit(&self, pns: &str) -> bool {
        let mut counters = self.counters.lock();
        let counter = counters.entry(pns.to_string()).or_insert(0);
        *counter += 1;
        *counter == 1 || (*counter & self.admit_mask) == 0
    }

    /// Offers `payload` for sampling under `pns`. Returns `true` if it was
    /// actually recorded (admitted by the rate gate, and not a duplicate of
    /// something already retained).
    pub async fn try_sample(&self, pns: &str, payload: &str, now_secs: u64) -> Result<bool> {
        if !self.should_admit(pns) {
            return Ok(false);
        }

        let hash = content_hash(payload);
        let hash_key = hub_core::keys::sample_hash(&self.name, pns);
        if self.client.set_is_member(&hash_key, &hash).await? {
            return Ok(false);
        }

        let data_key = hub_core::keys::sample_data(&self.name, pns);
        self.client.set_add(&hash_key, &hash).await?;
        self.client.zset_add(&data_key, payload, now_secs as f64).await?;
        self.client.zset_trim_to_max(&data_key, self.max_len).await?;
        self.client
            .incr_by(&hub_core::keys::sample_count(&self.name, pns), 1)
            .await?;
        Ok(true)
    }

    /// Deletes entries older than the configured TTL. Intended to be driven
    /// by a periodic background task rather than called per-record, since
    /// it scans the whole sorted set's low end.
    pub async fn evict_expired(&self, pns: &str, now_secs: u64) -> Result<u64> {
        let data_key = hub_core::keys::sample_data(&self.name, pns);
        let cutoff = now_secs.saturating_sub(self.ttl.as_secs());
        self.client
            .zset_remove_range_by_score(&data_key, 0.0, cutoff as f64)
            .await
    }

    pub async fn records(&self, pns: &str) -> Result<Vec<hub_kv::ScoredMember>> {
        let data_key = hub_core::keys::sample_data(&self.name, pns);
        self.client
            .zset_range_by_score(&data_key, f64::MIN, f64::MAX)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_kv::InMemoryKv;

    #[tokio::test]
    async fn first_record_for_a_pns_is_always_forced_through() {
        let client = Arc::new(InMemoryKv::new());
        let sampler = Sampler::new(client, "debug", 64, 1000, Duration::from_secs(86400));
        assert!(sampler.try_sample("PNS.a", "rec-1", 1).await.unwrap());
    }

    #[tokio::test]
    async fn admits_roughly_one_in_rate_and_skips_the_rest() {
        let client = Arc::new(InMemoryKv::new());
        let sampler = Sampler::new(client, "debug", 4, 1000, Duration::from_secs(86400));
        let mut admitted = 0;
        for i in 0..12 {
            if sampler
                .try_sample("PNS.a", &format!("rec-{i}"), i as u64)
                .await
                .unwrap()
            {
                admitted += 1;
            }
        }
        // Forced first (i=0) + every 4th counter value (4, 8, 12 -> i=3,7,11)
        assert_eq!(admitted, 4);
    }

    #[tokio::test]
    async fn duplicate_content_is_not_recorded_twice() {
        let client = Arc::new(InMemoryKv::new());
        let sampler = Sampler::new(client, "debug", 1, 1000, Duration::from_secs(86400));
        assert!(sampler.try_sample("PNS.a", "same", 1).await.unwrap());
        assert!(!sampler.try_sample("PNS.a", "same", 2).await.unwrap());
    }

    #[tokio::test]
    async fn evict_expired_removes_only_entries_past_the_ttl() {
        let client = Arc::new(InMemoryKv::new());
        let sampler = Sampler::new(client, "debug", 1, 1000, Duration::from_secs(10));
        sampler.try_sample("PNS.a", "old", 0).await.unwrap();
        sampler.try_sample("PNS.a", "new", 100).await.unwrap();
        let removed = sampler.evict_expired("PNS.a", 100).await.unwrap();
        assert_eq!(removed, 1);
        let remaining = sampler.records("PNS.a").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].member, "new");
    }
}
