//! Cluster membership snapshot (spec §3's Cluster record: `{nodeID,
//! isLeader, leaderID, lastSeen, announcedAddress}`), refreshed from KV
//! reads and exposed read-only for diagnostics. This is additive, not a
//! consistency mechanism: it does not participate in leader election, and
//! nothing in this crate reads it to make a decision — `leader.rs` is the
//! sole source of truth for who holds the lock.

use std::sync::Arc;
use std::time::Duration;

use hub_core::error::Result;
use hub_kv::KvClient;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::leader::current_leader;

/// One node's most recently announced membership record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemberRecord {
    pub node_id: String,
    pub is_leader: bool,
    pub leader_id: Option<String>,
    pub last_seen: String,
    pub announced_address: Option<String>,
}

/// Writes this node's current membership record, reading `leader-ready` to
/// fill in `is_leader`/`leader_id` rather than trusting the caller's own
/// belief about leadership.
pub async fn announce<C: KvClient>(client: &C, node_id: &str, announced_address: Option<&str>) -> Result<()> {
    let leader = current_leader(client).await?;
    let record = MemberRecord {
        node_id: node_id.to_string(),
        is_leader: leader.as_ref().map(|l| l.node_id.as_str()) == Some(node_id),
        leader_id: leader.map(|l| l.node_id),
        last_seen: chrono::Utc::now().to_rfc3339(),
        announced_address: announced_address.map(str::to_string),
    };
    let payload = serde_json::to_string(&record).unwrap_or_default();
    client.hash_set(&hub_core::keys::cluster_members(), node_id, &payload).await
}

/// Reads every node's last-announced membership record. A node that stops
/// announcing is not pruned here — its `last_seen` simply stops advancing;
/// deciding what counts as "stale" is a diagnostic concern, not this
/// module's.
pub async fn members<C: KvClient>(client: &C) -> Result<Vec<MemberRecord>> {
    let raw = client.hash_get_all(&hub_core::keys::cluster_members()).await?;
    Ok(raw
        .into_iter()
        .filter_map(|(_, value)| match serde_json::from_str(&value) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, "failed to parse cluster membership record, dropping it from the snapshot");
                None
            }
        })
        .collect())
}

/// Announces this node's membership on a fixed interval until cancelled,
/// the same heartbeat shape `leader::hold_leadership` uses for
/// `leader-ready` refresh.
pub async fn run_membership_announcer<C: KvClient>(
    client: Arc<C>,
    node_id: String,
    announced_address: Option<String>,
    interval: Duration,
    cancel: hub_core::context::Cancellation,
) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => {
                announce(client.as_ref(), &node_id, announced_address.as_deref()).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_kv::InMemoryKv;

    #[tokio::test]
    async fn announce_is_visible_to_members() {
        let client = InMemoryKv::new();
        announce(&client, "node-a", Some("10.0.0.1:7000")).await.unwrap();

        let all = members(&client).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].node_id, "node-a");
        assert_eq!(all[0].announced_address.as_deref(), Some("10.0.0.1:7000"));
        assert!(!all[0].is_leader);
        assert!(all[0].leader_id.is_none());
    }

    #[tokio::test]
    async fn announce_reflects_current_leader_ready() {
        let client = InMemoryKv::new();
        client
            .set(
                &hub_core::keys::leader_ready(),
                r#"{"node_id":"node-a","timestamp":"now","ready":true}"#,
                Some(30),
            )
            .await
            .unwrap();

        announce(&client, "node-a", None).await.unwrap();
        announce(&client, "node-b", None).await.unwrap();

        let all = members(&client).await.unwrap();
        let a = all.iter().find(|m| m.node_id == "node-a").unwrap();
        let b = all.iter().find(|m| m.node_id == "node-b").unwrap();
        assert!(a.is_leader);
        assert_eq!(a.leader_id.as_deref(), Some("node-a"));
        assert!(!b.is_leader);
        assert_eq!(b.leader_id.as_deref(), Some("node-a"));
    }

    #[tokio::test]
    async fn announcer_stops_when_cancelled() {
        let client = Arc::new(InMemoryKv::new());
        let cancel = hub_core::context::Cancellation::new();
        let cancel_clone = cancel.clone();
        let client_clone = client.clone();
        let handle = tokio::spawn(async move {
            run_membership_announcer(
                client_clone,
                "node-a".to_string(),
                Some("127.0.0.1:9000".to_string()),
                Duration::from_millis(5),
                cancel_clone,
            )
            .await
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let all = members(client.as_ref()).await.unwrap();
        assert_eq!(all[0].announced_address.as_deref(), Some("127.0.0.1:9000"));
    }
}
