//! A source-free project used by the `run`/`reconcile-once`/`show-status`
//! subcommands so the reconciliation loop has something real to start and
//! stop: every project id resolves to a single loopback input wired
//! directly to a loopback output. Parsing real component declarations
//! (YAML/XML text, the embedded rule-expression language) is an external
//! collaborator this binary does not implement.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use hub_adapters::{LoopbackInput, LoopbackOutput, LoopbackQueue, LoopbackSink};
use hub_core::component::{ComponentKind, ComponentMeta, InputComponent, OutputComponent, RulesetComponent};
use hub_core::error::{HubError, Result};
use hub_core::ids::ProjectId;
use hub_pipeline::registry::ComponentFactory;
use hub_pipeline::{Project, ProjectSpec};
use parking_lot::Mutex;

#[derive(Default)]
struct LoopbackFactory {
    queues: Mutex<HashMap<String, Arc<LoopbackQueue>>>,
    sinks: Mutex<HashMap<String, Arc<LoopbackSink>>>,
}

impl LoopbackFactory {
    fn queue_for(&self, id: &str) -> Arc<LoopbackQueue> {
        self.queues
            .lock()
            .entry(id.to_string())
            .or_insert_with(LoopbackQueue::new)
            .clone()
    }

    fn sink_for(&self, id: &str) -> Arc<LoopbackSink> {
        self.sinks
            .lock()
            .entry(id.to_string())
            .or_insert_with(LoopbackSink::new)
            .clone()
    }
}

#[async_trait]
impl ComponentFactory for LoopbackFactory {
    async fn build_input(&self, meta: &ComponentMeta) -> Result<Box<dyn InputComponent>> {
        Ok(Box::new(LoopbackInput::new(self.queue_for(&meta.id))))
    }

    async fn build_output(&self, meta: &ComponentMeta) -> Result<Box<dyn OutputComponent>> {
        Ok(Box::new(LoopbackOutput::new(self.sink_for(&meta.id))))
    }

    async fn build_ruleset(&self, _meta: &ComponentMeta) -> Result<Box<dyn RulesetComponent>> {
        Err(HubError::invalid_config("demo projects declare no ruleset node"))
    }
}

/// Resolves any project id to a two-node `input -> output` project backed
/// by in-memory loopback queues, so the cluster-node subcommands have a
/// real, startable [`Project`] to reconcile against.
pub struct DemoProjectSource {
    factory: Arc<LoopbackFactory>,
}

impl DemoProjectSource {
    pub fn new() -> Self {
        Self {
            factory: Arc::new(LoopbackFactory::default()),
        }
    }
}

#[async_trait]
impl hub_cluster::ProjectSource for DemoProjectSource {
    async fn load(&self, project_id: &str) -> Result<Arc<Project>> {
        let input_id = format!("{project_id}-in");
        let output_id = format!("{project_id}-out");
        let spec = ProjectSpec::new()
            .with_node(input_id.clone(), ComponentKind::Input, "")
            .with_node(output_id.clone(), ComponentKind::Output, "")
            .with_edge(input_id, output_id);
        Ok(Arc::new(Project::new(
            ProjectId::new(project_id),
            spec,
            self.factory.clone(),
        )?))
    }
}
