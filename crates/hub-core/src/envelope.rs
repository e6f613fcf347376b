//! The in-flight record (spec §3).
//!
//! An [`Envelope`] is owned by at most one component at a time; ownership
//! transfers over a queue. Fan-out clones the envelope once per downstream
//! edge — `Value::clone` is shallow for `List`/`Map` variants (an `Arc`-free
//! deep structural clone of the container, but leaf scalars are `Copy` or
//! cheap `Arc<str>`), matching the "shallow-clone mutable envelopes before
//! fan-out" rule; a ruleset that mutates nested containers is responsible for
//! its own deep copy before doing so.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Sum type mirroring spec §3's `{string | number | boolean | mapping | list
/// | null}`. Serializes 1:1 with `serde_json::Value` so envelopes can cross
/// the plugin IPC boundary and land in the operation-history audit trail
/// without a second conversion layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(Arc<str>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn string(value: impl AsRef<str>) -> Self {
        Value::String(Arc::from(value.as_ref()))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => Value::String(Arc::from(s.as_str())),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

/// A mapping from string keys to [`Value`]s. `Clone` is the shallow clone
/// required by fan-out: cloning an `Envelope` is O(n) in the number of
/// top-level keys and does not deep-copy shared leaf values beyond what
/// `Value::clone` already does structurally.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope(BTreeMap<String, Value>);

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fan-out helper: produces `count` independent owned copies, one per
    /// downstream edge. Each copy may be mutated by its consumer without
    /// affecting the others.
    pub fn fan_out(&self, count: usize) -> Vec<Envelope> {
        (0..count).map(|_| self.clone()).collect()
    }
}

impl FromIterator<(String, Value)> for Envelope {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
