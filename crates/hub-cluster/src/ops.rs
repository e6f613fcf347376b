//! Operation history (spec §4.3, §6): every state change and component
//! mutation is appended to `cluster:ops_history`, newest first, trimmed to
//! the retention constants in [`hub_core::keys::retention`].

use hub_core::error::Result;
use hub_kv::KvClient;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperationRecord {
    pub node_id: String,
    pub op: String,
    pub target: String,
    pub detail: Option<String>,
    pub timestamp: String,
}

pub async fn record<C: KvClient>(
    client: &C,
    node_id: &str,
    op: &str,
    target: &str,
    detail: Option<String>,
) -> Result<()> {
    let entry = OperationRecord {
        node_id: node_id.to_string(),
        op: op.to_string(),
        target: target.to_string(),
        detail,
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    let payload = serde_json::to_string(&entry).unwrap_or_default();
    client
        .list_push_trim(
            &hub_core::keys::ops_history(),
            &payload,
            hub_core::keys::retention::OPS_HISTORY_MAX_ENTRIES,
            Some(hub_core::keys::retention::OPS_HISTORY_TTL_DAYS * 86_400),
        )
        .await
}

pub async fn recent<C: KvClient>(client: &C, limit: usize) -> Result<Vec<OperationRecord>> {
    let raw = client
        .list_range(&hub_core::keys::ops_history(), 0, limit.saturating_sub(1) as isize)
        .await?;
    Ok(raw.into_iter().filter_map(|s| serde_json::from_str(&s).ok()).collect())
}
