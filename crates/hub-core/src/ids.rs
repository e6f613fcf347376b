//! Stable identifiers, per spec §3.
//!
//! `ComponentId` and `ProjectId` are opaque, cheaply-cloneable wrappers over
//! an `Arc<str>` so they can be stashed in KV keys, log fields, and the stats
//! subsystem's composite keys without repeated heap churn.

use std::fmt;
use std::sync::Arc;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Arc<str>);

        impl $name {
            pub fn new(id: impl AsRef<str>) -> Self {
                Self(Arc::from(id.as_ref()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Ok(Self::new(s))
            }
        }
    };
}

string_id!(ComponentId);
string_id!(ProjectId);

/// Dotted `PNS` path, e.g. `INPUT.kafka1.RULESET.filter.OUTPUT.es1`.
///
/// This is the primary metrics key: the same ruleset used by two projects
/// produces two distinct `ProjectNodeSequence` values, so daily counters and
/// QPS samples never collapse across projects.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectNodeSequence(Arc<str>);

/// One segment kind in a PNS path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PnsKind {
    Input,
    Ruleset,
    Output,
    Plugin,
}

impl PnsKind {
    fn as_str(self) -> &'static str {
        match self {
            PnsKind::Input => "INPUT",
            PnsKind::Ruleset => "RULESET",
            PnsKind::Output => "OUTPUT",
            PnsKind::Plugin => "PLUGIN",
        }
    }
}

/// Builds a `PNS` by appending `{KIND}.{id}` segments in DAG traversal order.
#[derive(Default)]
pub struct PnsBuilder {
    segments: Vec<String>,
}

impl PnsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, kind: PnsKind, id: &str) -> Self {
        self.segments.push(kind.as_str().to_string());
        self.segments.push(id.to_string());
        self
    }

    pub fn build(self) -> ProjectNodeSequence {
        ProjectNodeSequence(Arc::from(self.segments.join(".")))
    }
}

impl ProjectNodeSequence {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(Arc::from(raw.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn builder() -> PnsBuilder {
        PnsBuilder::new()
    }
}

impl fmt::Display for ProjectNodeSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl serde::Serialize for ProjectNodeSequence {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for ProjectNodeSequence {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::new(s))
    }
}
