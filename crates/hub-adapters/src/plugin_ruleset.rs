//! A ruleset backed by a sandboxed plugin process (spec §4.1, §4.2): each
//! `evaluate` call is one request/response round trip over the plugin IPC
//! ring buffers. The wire payload is the envelope's JSON encoding in, a
//! JSON array of envelopes out — the structured encoding itself is owned
//! by plugin code, per spec §6, so this adapter only has to agree on
//! "JSON object in, JSON array of objects out".

use async_trait::async_trait;
use hub_core::envelope::{Envelope, Value};
use hub_core::error::{HubError, Result};
use hub_plugin_ipc::process::PluginHandle;
use hub_plugin_ipc::router::PluginIpcError;
use std::sync::Arc;

pub struct PluginRuleset {
    handle: Arc<PluginHandle>,
}

impl PluginRuleset {
    pub fn new(handle: Arc<PluginHandle>) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl hub_core::component::RulesetComponent for PluginRuleset {
    async fn evaluate(&self, input: &Envelope) -> Result<Vec<Envelope>> {
        let map: std::collections::BTreeMap<_, _> = input.iter().collect();
        let payload = serde_json::to_vec(&map)
            .map_err(|e| HubError::component_failure(format!("envelope encode failed: {e}")))?;

        let response = self.handle.call(&payload).await.map_err(map_ipc_error)?;

        let parsed: serde_json::Value = serde_json::from_slice(&response)
            .map_err(|e| HubError::component_failure(format!("malformed plugin response: {e}")))?;
        let items = match parsed {
            serde_json::Value::Array(items) => items,
            other => vec![other],
        };
        items
            .into_iter()
            .map(|item| match Value::from(item) {
                Value::Map(map) => Ok(map.into_iter().collect()),
                _ => Err(HubError::component_failure("plugin response item is not a JSON object")),
            })
            .collect()
    }
}

fn map_ipc_error(e: PluginIpcError) -> HubError {
    match e {
        PluginIpcError::Timeout(d) => HubError::timeout("plugin call", d.as_millis() as u64),
        PluginIpcError::PluginCrashed => HubError::component_failure("plugin process crashed"),
        PluginIpcError::ChannelClosed => HubError::component_failure("plugin response channel closed"),
        PluginIpcError::Ring(ring_err) => HubError::component_failure(format!("plugin ring error: {ring_err}")),
    }
}
