//! Per-day hash counters keyed by `(date, nodeID, projectID, PNS)` (spec
//! §4.4, §6). The collector ticks at a fixed interval, asks each running
//! component for `Counter::take_delta`, and applies `HINCRBY` against the
//! day's hash. Because the delta is always non-negative even across a
//! component restart (see [`hub_core::component::Counter`]), repeated
//! application never double-counts and a crashed collector simply resumes
//! accumulating from wherever the next tick finds it.

use std::sync::Arc;

use hub_core::error::Result;
use hub_core::{ComponentId, ProjectId, ProjectNodeSequence};
use hub_kv::KvClient;

/// Today's date in `YYYY-MM-DD`, the granularity the daily hash key is
/// bucketed at.
pub fn today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}

/// One component's observed delta for a single collection tick.
#[derive(Clone, Debug)]
pub struct ComponentDelta {
    pub project_id: ProjectId,
    pub component_type: &'static str,
    pub component_id: ComponentId,
    pub pns: ProjectNodeSequence,
    pub delta: u64,
}

pub struct DailyCollector<C: KvClient> {
    client: Arc<C>,
    node_id: String,
    retention_days: u32,
}

impl<C: KvClient> DailyCollector<C> {
    pub fn new(client: Arc<C>, node_id: impl Into<String>, retention_days: u32) -> Self {
        Self {
            client,
            node_id: node_id.into(),
            retention_days,
        }
    }

    /// Applies one tick's worth of deltas to today's hash. Zero-delta
    /// components are skipped — an idle component should not generate a
    /// write every tick.
    pub async fn record_tick(&self, deltas: &[ComponentDelta]) -> Result<()> {
        let date = today();
        let hash_key = hub_core::keys::daily_stats_hash(&date);
        for d in deltas {
            if d.delta == 0 {
                continue;
            }
            let field = hub_core::keys::daily_stats_field(
                &self.node_id,
                d.project_id.as_str(),
                d.component_type,
                d.component_id.as_str(),
                d.pns.as_str(),
            );
            if let Err(err) = self
                .client
                .hash_incr(&hash_key, &field, d.delta as i64)
                .await
            {
                tracing::warn!(error = %err, field, "daily stats tick: transient KV failure, will resynthesize next tick");
            }
        }
        let ttl_secs = self.retention_days as u64 * 24 * 3600;
        if let Err(err) = self.client.expire(&hash_key, ttl_secs).await {
            tracing::warn!(error = %err, hash_key, "failed to refresh daily stats TTL");
        }
        Ok(())
    }

    /// Reads every field currently recorded for `date`, for the dashboard /
    /// CLI surface.
    pub async fn read_day(&self, date: &str) -> Result<Vec<(String, i64)>> {
        let hash_key = hub_core::keys::daily_stats_hash(date);
        let fields = self.client.hash_get_all(&hash_key).await?;
        Ok(fields
            .into_iter()
            .filter_map(|(field, value)| value.parse::<i64>().ok().map(|v| (field, v)))
            .collect())
    }
}
