//! The seam between a project's declared node and the concrete component
//! that implements it (spec §4.1). `hub-pipeline` has no knowledge of
//! Kafka, Elasticsearch, or the plugin IPC transport; a
//! [`ComponentFactory`] is supplied by the caller (normally `hub-adapters`
//! plus a plugin-backed ruleset factory) and handed to [`crate::project::Project`].

use async_trait::async_trait;
use hub_core::component::{ComponentMeta, InputComponent, OutputComponent, RulesetComponent};
use hub_core::error::Result;

/// Builds concrete component instances from their declared metadata. One
/// factory instance is shared across every project materialized by a given
/// process, since it owns no per-project state of its own — all per-project
/// state lives in the components it returns.
#[async_trait]
pub trait ComponentFactory: Send + Sync {
    async fn build_input(&self, meta: &ComponentMeta) -> Result<Box<dyn InputComponent>>;
    async fn build_output(&self, meta: &ComponentMeta) -> Result<Box<dyn OutputComponent>>;
    async fn build_ruleset(&self, meta: &ComponentMeta) -> Result<Box<dyn RulesetComponent>>;
}

/// Fixture components used by this crate's own tests and, via the
/// `test-utils` feature, by downstream crates (`hub-cluster`) that need a
/// deterministic [`ComponentFactory`] without pulling in a real broker
/// adapter.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_support {
    use super::*;
    use hub_core::envelope::Envelope;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    /// An input that emits a fixed, pre-loaded sequence of envelopes and
    /// then goes idle, used by worker/project tests that need a
    /// deterministic source without pulling in a real broker client.
    pub struct ScriptedInput {
        pub queue: std::sync::Mutex<std::collections::VecDeque<Envelope>>,
        pub opened: AtomicUsize,
        pub closed: AtomicUsize,
    }

    impl ScriptedInput {
        pub fn new(envelopes: Vec<Envelope>) -> Self {
            Self {
                queue: std::sync::Mutex::new(envelopes.into()),
                opened: AtomicUsize::new(0),
                closed: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl InputComponent for ScriptedInput {
        async fn open(&mut self) -> Result<()> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn poll(&mut self) -> Result<Option<Envelope>> {
            Ok(self.queue.lock().unwrap().pop_front())
        }
    }

    /// An output that forwards every delivered envelope onto an mpsc
    /// channel so a test can assert on what actually arrived downstream.
    pub struct CollectingOutput {
        pub sink: mpsc::UnboundedSender<Envelope>,
    }

    #[async_trait]
    impl OutputComponent for CollectingOutput {
        async fn open(&mut self) -> Result<()> {
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }

        async fn send(&mut self, envelope: Envelope) -> Result<()> {
            let _ = self.sink.send(envelope);
            Ok(())
        }
    }

    /// A ruleset that passes its input through unchanged, optionally
    /// duplicating it to exercise fan-out.
    pub struct PassthroughRuleset {
        pub fan_out: usize,
    }

    #[async_trait]
    impl RulesetComponent for PassthroughRuleset {
        async fn evaluate(&self, input: &Envelope) -> Result<Vec<Envelope>> {
            Ok(input.fan_out(self.fan_out.max(1)))
        }
    }

    pub struct TestFactory {
        pub inputs: std::sync::Mutex<std::collections::HashMap<String, Vec<Envelope>>>,
        pub outputs: std::sync::Mutex<std::collections::HashMap<String, mpsc::UnboundedSender<Envelope>>>,
        pub ruleset_fan_out: usize,
    }

    impl TestFactory {
        pub fn new(ruleset_fan_out: usize) -> Arc<Self> {
            Arc::new(Self {
                inputs: std::sync::Mutex::new(std::collections::HashMap::new()),
                outputs: std::sync::Mutex::new(std::collections::HashMap::new()),
                ruleset_fan_out,
            })
        }

        pub fn register_input(&self, id: &str, envelopes: Vec<Envelope>) {
            self.inputs.lock().unwrap().insert(id.to_string(), envelopes);
        }

        pub fn register_output(&self, id: &str) -> mpsc::UnboundedReceiver<Envelope> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.outputs.lock().unwrap().insert(id.to_string(), tx);
            rx
        }
    }

    #[async_trait]
    impl ComponentFactory for TestFactory {
        async fn build_input(&self, meta: &ComponentMeta) -> Result<Box<dyn InputComponent>> {
            let envelopes = self
                .inputs
                .lock()
                .unwrap()
                .remove(&meta.id)
                .unwrap_or_default();
            Ok(Box::new(ScriptedInput::new(envelopes)))
        }

        async fn build_output(&self, meta: &ComponentMeta) -> Result<Box<dyn OutputComponent>> {
            let sink = self
                .outputs
                .lock()
                .unwrap()
                .get(&meta.id)
                .cloned()
                .ok_or_else(|| hub_core::error::HubError::not_found(meta.id.clone()))?;
            Ok(Box::new(CollectingOutput { sink }))
        }

        async fn build_ruleset(&self, _meta: &ComponentMeta) -> Result<Box<dyn RulesetComponent>> {
            Ok(Box::new(PassthroughRuleset {
                fan_out: self.ruleset_fan_out,
            }))
        }
    }
}
