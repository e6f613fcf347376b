//! QPS rollups keyed by `(nodeID, PNS)` (spec §4.4): a one-hour local ring
//! per component, persisted to a bounded KV list so the leader can
//! aggregate across nodes, plus a once-per-minute leader-side cache.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hub_core::error::Result;
use hub_kv::KvClient;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// One observed data point: the instantaneous rate and the running total at
/// the time it was sampled.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct QpsPoint {
    pub qps: f64,
    pub total_messages: u64,
    pub timestamp_secs: u64,
}

/// A bounded in-process ring of the last hour's points for one `(node,
/// PNS)` pair. Kept separately from the KV-persisted copy so a reader can
/// serve the local node's own recent history without a round trip.
#[derive(Default)]
pub struct QpsRing {
    series: Mutex<HashMap<String, VecDeque<QpsPoint>>>,
    window: Duration,
}

impl QpsRing {
    pub fn new(window: Duration) -> Self {
        Self {
            series: Mutex::new(HashMap::new()),
            window,
        }
    }

    pub fn record(&self, series_key: &str, point: QpsPoint) {
        let mut series = self.series.lock();
        let deque = series.entry(series_key.to_string()).or_default();
        deque.push_back(point);
        let cutoff = point.timestamp_secs.saturating_sub(self.window.as_secs());
        while deque.front().map(|p| p.timestamp_secs < cutoff).unwrap_or(false) {
            deque.pop_front();
        }
    }

    pub fn window_for(&self, series_key: &str) -> Vec<QpsPoint> {
        self.series
            .lock()
            .get(series_key)
            .map(|d| d.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// Persists this node's own QPS points into the KV-backed per-`(node, PNS)`
/// list, trimmed to the retention window.
pub struct QpsPublisher<C: KvClient> {
    client: Arc<C>,
    node_id: String,
    max_points: usize,
}

impl<C: KvClient> QpsPublisher<C> {
    pub fn new(client: Arc<C>, node_id: impl Into<String>, max_points: usize) -> Self {
        Self {
            client,
            node_id: node_id.into(),
            max_points,
        }
    }

    pub async fn publish(&self, pns: &str, point: QpsPoint) -> Result<()> {
        let key = hub_core::keys::qps_series(&self.node_id, pns);
        let payload = serde_json::to_string(&point).unwrap_or_default();
        self.client
            .list_push_trim(
                &key,
                &payload,
                self.max_points,
                Some(hub_core::keys::retention::QPS_WINDOW_SECS),
            )
            .await
    }
}

/// One minute's aggregated sum across every node reporting for a PNS.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MinutePoint {
    pub minute_epoch: u64,
    pub qps_sum: f64,
}

struct CachedSeries {
    computed_at: Instant,
    series: Vec<MinutePoint>,
}

/// Leader-side aggregator: discovers every node's series for a PNS via
/// `keys_by_pattern`, sums points into one-minute buckets, and caches the
/// result for up to one minute so repeated reads (dashboard polling, the
/// CLI) don't re-scan the KV store on every call.
pub struct MinuteAggregator<C: KvClient> {
    client: Arc<C>,
    cache: Mutex<HashMap<String, CachedSeries>>,
    recompute_interval: Duration,
}

impl<C: KvClient> MinuteAggregator<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self {
            client,
            cache: Mutex::new(HashMap::new()),
            recompute_interval: Duration::from_secs(60),
        }
    }

    pub async fn aggregated(&self, pns: &str) -> Result<Vec<MinutePoint>> {
        if let Some(cached) = self.cache.lock().get(pns) {
            if cached.computed_at.elapsed() < self.recompute_interval {
                return Ok(cached.series.clone());
            }
        }
        let series = self.recompute(pns).await?;
        self.cache.lock().insert(
            pns.to_string(),
            CachedSeries {
                computed_at: Instant::now(),
                series: series.clone(),
            },
        );
        Ok(series)
    }

    async fn recompute(&self, pns: &str) -> Result<Vec<MinutePoint>> {
        // `keys_by_pattern` only supports a left-anchored prefix scan (the
        // same limit a plain `KEYS prefix:*` scan has), so the per-node
        // wildcard in the middle of the key is filtered client-side instead
        // of being expressed in the pattern itself.
        let suffix = format!(":{pns}");
        let keys: Vec<String> = self
            .client
            .keys_by_pattern("hub:qps:*")
            .await?
            .into_iter()
            .filter(|k| k.ends_with(&suffix))
            .collect();
        let mut buckets: HashMap<u64, f64> = HashMap::new();
        for key in keys {
            let raw_points = self.client.list_range(&key, 0, -1).await?;
            for raw in raw_points {
                if let Ok(point) = serde_json::from_str::<QpsPoint>(&raw) {
                    let minute = point.timestamp_secs / 60 * 60;
                    *buckets.entry(minute).or_insert(0.0) += point.qps;
                }
            }
        }
        let mut series: Vec<MinutePoint> = buckets
            .into_iter()
            .map(|(minute_epoch, qps_sum)| MinutePoint {
                minute_epoch,
                qps_sum,
            })
            .collect();
        series.sort_by_key(|p| p.minute_epoch);
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_kv::InMemoryKv;

    #[test]
    fn ring_evicts_points_older_than_one_hour() {
        let ring = QpsRing::new(Duration::from_secs(3600));
        ring.record(
            "node1.PNS.a",
            QpsPoint {
                qps: 10.0,
                total_messages: 100,
                timestamp_secs: 0,
            },
        );
        ring.record(
            "node1.PNS.a",
            QpsPoint {
                qps: 20.0,
                total_messages: 200,
                timestamp_secs: 4000,
            },
        );
        let window = ring.window_for("node1.PNS.a");
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].total_messages, 200);
    }

    #[tokio::test]
    async fn aggregator_sums_across_nodes_into_minute_buckets() {
        let client = Arc::new(InMemoryKv::new());
        let pub_a = QpsPublisher::new(client.clone(), "nodeA", 100);
        let pub_b = QpsPublisher::new(client.clone(), "nodeB", 100);
        pub_a
            .publish(
                "PNS.x",
                QpsPoint {
                    qps: 3.0,
                    total_messages: 30,
                    timestamp_secs: 120,
                },
            )
            .await
            .unwrap();
        pub_b
            .publish(
                "PNS.x",
                QpsPoint {
                    qps: 4.0,
                    total_messages: 40,
                    timestamp_secs: 121,
                },
            )
            .await
            .unwrap();

        let aggregator = MinuteAggregator::new(client);
        let series = aggregator.aggregated("PNS.x").await.unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].minute_epoch, 120);
        assert!((series[0].qps_sum - 7.0).abs() < f64::EPSILON);
    }
}
