//! Config replication (spec §4.3, §6): the leader is the only writer of
//! component source text; followers periodically reconcile a local,
//! memory-only registry from the KV store. Parsing that text into a
//! runnable component is out of scope here (the concrete YAML/XML formats
//! are an external collaborator per the overview) — this module only
//! carries the opaque text and the kind/id routing around it.

use std::collections::HashMap;
use std::sync::Arc;

use hub_core::error::Result;
use hub_kv::KvClient;
use parking_lot::RwLock;

/// The four typed kinds config replication routes by, per spec §4.3's
/// `input|output|ruleset|project|plugin` taxonomy (plugin source ships
/// alongside ruleset declarations rather than as its own registry here,
/// since a plugin is invoked through a ruleset, never started on its own).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConfigKind {
    Input,
    Output,
    Ruleset,
    Project,
    Plugin,
}

impl ConfigKind {
    fn as_str(self) -> &'static str {
        match self {
            ConfigKind::Input => "input",
            ConfigKind::Output => "output",
            ConfigKind::Ruleset => "ruleset",
            ConfigKind::Project => "project",
            ConfigKind::Plugin => "plugin",
        }
    }
}

/// Leader-side writer: the authoritative source for component text.
/// File-system materialization (writing the on-disk config root) is the
/// caller's responsibility and happens before this call, per spec §6's
/// "file first, then KV" ordering.
pub struct ConfigPublisher<C: KvClient> {
    client: Arc<C>,
}

impl<C: KvClient> ConfigPublisher<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }

    pub async fn publish(&self, kind: ConfigKind, id: &str, text: &str) -> Result<()> {
        let key = hub_core::keys::component_source(kind.as_str(), id);
        self.client.set(&key, text, None).await?;
        self.client
            .publish(
                "hub:config_changes",
                &serde_json::json!({
                    "type": kind.as_str(),
                    "id": id,
                    "op": "updated",
                })
                .to_string(),
            )
            .await
    }

    pub async fn publish_project(&self, project_id: &str, text: &str) -> Result<()> {
        self.client
            .set(
                &hub_core::keys::project_config(project_id),
                text,
                Some(hub_core::keys::retention::PROJECT_CONFIG_TTL_DAYS * 86_400),
            )
            .await
    }

    pub async fn delete(&self, kind: ConfigKind, id: &str) -> Result<()> {
        let key = hub_core::keys::component_source(kind.as_str(), id);
        self.client.delete(&key).await?;
        self.client
            .publish(
                "hub:config_changes",
                &serde_json::json!({
                    "type": kind.as_str(),
                    "id": id,
                    "op": "deleted",
                })
                .to_string(),
            )
            .await
    }
}

/// Follower-side, memory-only registry reconciled periodically from the KV
/// store (spec §4.3: "Followers subscribe or periodically reconcile,
/// updating their in-memory registry").
#[derive(Default)]
pub struct ConfigRegistry {
    sources: RwLock<HashMap<(&'static str, String), String>>,
}

impl ConfigRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: ConfigKind, id: &str) -> Option<String> {
        self.sources.read().get(&(kind.as_str(), id.to_string())).cloned()
    }

    pub fn len(&self) -> usize {
        self.sources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.read().is_empty()
    }

    /// Scans every `{kind}:*` prefix and replaces the in-memory snapshot
    /// wholesale. Simple and correct for a periodic reconcile; a follower
    /// never partially-applies a scan (it's all-or-nothing per kind), so a
    /// reader never observes a registry with some kinds mid-sync and others
    /// stale.
    pub async fn reconcile<C: KvClient>(&self, client: &C) -> Result<()> {
        let mut next = HashMap::new();
        for kind in [
            ConfigKind::Input,
            ConfigKind::Output,
            ConfigKind::Ruleset,
            ConfigKind::Project,
            ConfigKind::Plugin,
        ] {
            let prefix = format!("{}:", kind.as_str());
            for key in client.keys_by_pattern(&format!("{prefix}*")).await? {
                let Some(id) = key.strip_prefix(&prefix) else {
                    continue;
                };
                if let Some(text) = client.get(&key).await? {
                    next.insert((kind.as_str(), id.to_string()), text);
                }
            }
        }
        *self.sources.write() = next;
        Ok(())
    }
}
