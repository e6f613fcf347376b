//! Component contract (spec §3, §4.1).
//!
//! The pipeline runtime treats rulesets, inputs, outputs and plugins as
//! opaque behind these traits. A component's *identity* (`ComponentMeta`) is
//! separate from its *behavior* (the trait impl) so the same ruleset source
//! can be materialized twice, once per project, each instance counting its
//! own deliveries independently.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::envelope::Envelope;
use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Input,
    Output,
    Ruleset,
    Plugin,
    Project,
}

impl ComponentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ComponentKind::Input => "input",
            ComponentKind::Output => "output",
            ComponentKind::Ruleset => "ruleset",
            ComponentKind::Plugin => "plugin",
            ComponentKind::Project => "project",
        }
    }
}

/// Identity of a component declaration: its kind, its stable id (unique
/// within that kind), and the immutable source text it was parsed from.
#[derive(Clone, Debug)]
pub struct ComponentMeta {
    pub kind: ComponentKind,
    pub id: String,
    pub source: String,
}

/// Monotonic message counter with delta-since-last-read semantics (spec
/// §4.1 "Counter semantics").
///
/// The stats collector is the only summer: it calls [`Counter::take_delta`]
/// once per tick and applies the result to the day bucket. On component
/// restart the accumulator resets to zero but the counter keeps incrementing
/// from zero too, so the delta returned is never negative and the day total
/// never double-counts (spec §4.4 "Failure handling").
#[derive(Debug, Default)]
pub struct Counter {
    total: AtomicU64,
    last_read: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.total.fetch_add(n, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Returns the delta since the last call and atomically advances the
    /// watermark. If the observed total has decreased since the last read
    /// (a restarted component re-zeroing its local accumulator), the delta
    /// returned is `0`, never negative — the caller must treat this as a
    /// counter reset, not a rollback of prior progress.
    pub fn take_delta(&self) -> u64 {
        let total = self.total.load(Ordering::Acquire);
        let last = self.last_read.swap(total, Ordering::AcqRel);
        total.saturating_sub(last)
    }
}

/// An input adapter: the source of envelopes entering the graph. Concrete
/// broker clients (Kafka, Elasticsearch, SLS) are out of scope here — only
/// the open/close/poll lifecycle contract is defined; `hub-adapters`
/// implements thin shells against this trait.
#[async_trait]
pub trait InputComponent: Send + Sync {
    async fn open(&mut self) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
    /// Polls for the next envelope, or `Ok(None)` if the source is idle.
    async fn poll(&mut self) -> Result<Option<Envelope>>;
}

/// An output adapter: the sink envelopes are delivered to.
#[async_trait]
pub trait OutputComponent: Send + Sync {
    async fn open(&mut self) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
    async fn send(&mut self, envelope: Envelope) -> Result<()>;
}

/// A ruleset: given an input envelope, returns zero or more output
/// envelopes. MUST NOT mutate the caller's envelope (spec §4.1); outputs are
/// always owned, freshly-built values.
#[async_trait]
pub trait RulesetComponent: Send + Sync {
    async fn evaluate(&self, input: &Envelope) -> Result<Vec<Envelope>>;
}

/// Marker trait tying a component instance back to its [`ComponentMeta`] and
/// [`Counter`], used by the registry and the health monitor.
pub trait Component: Send + Sync {
    fn meta(&self) -> &ComponentMeta;
    fn counter(&self) -> &Counter;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_is_zero_on_first_read_then_reflects_increments() {
        let counter = Counter::new();
        assert_eq!(counter.take_delta(), 0);
        counter.add(10);
        assert_eq!(counter.take_delta(), 10);
        assert_eq!(counter.take_delta(), 0);
    }

    #[test]
    fn restart_reset_never_yields_negative_delta() {
        let counter = Counter::new();
        counter.add(1000);
        assert_eq!(counter.take_delta(), 1000);
        // Simulate a restarted component: a fresh Counter starts at zero,
        // i.e. the *observed* total dropped from the collector's point of
        // view even though no negative arithmetic ever happens here.
        let restarted = Counter::new();
        restarted.add(500);
        assert_eq!(restarted.take_delta(), 500);
    }
}
