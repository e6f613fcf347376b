//! Project lifecycle: `Start` / `Stop` / `Restart` over a validated
//! [`Topology`] (spec §4.1's status machine: stopped → starting → running →
//! stopping → stopped/error). A per-project `tokio::sync::Mutex` serializes
//! these transitions so two concurrent `Start` calls against the same
//! project can't race each other into materializing components twice.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hub_core::component::{ComponentKind, ComponentMeta, Counter};
use hub_core::context::Cancellation;
use hub_core::error::{ErrorContext, HubError, Result};
use hub_core::ids::{ComponentId, ProjectId, ProjectNodeSequence};
use hub_core::status::Status;
use parking_lot::RwLock;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::dag::{ProjectSpec, Topology};
use crate::registry::ComponentFactory;
use crate::worker::{self, EDGE_CAPACITY};

/// Structured per-component runtime state (spec §3's `Status.last_error`
/// plus `started_at`/`restart_count`): what [`HealthMonitor`][crate::health::HealthMonitor]
/// reads to assemble its error list without re-querying each component.
#[derive(Clone, Debug)]
pub struct ComponentState {
    pub kind: ComponentKind,
    pub component_id: ComponentId,
    pub pns: ProjectNodeSequence,
    pub status: Status,
    pub started_at: Option<Instant>,
    pub restart_count: u64,
}

/// A running (or stopped) instance of a validated project: the join handles
/// for its workers, the per-component counters the stats subsystem reads,
/// and the cancellation token that tears it all down.
pub struct Project {
    pub id: ProjectId,
    topology: Topology,
    spec: ProjectSpec,
    factory: Arc<dyn ComponentFactory>,
    lifecycle: AsyncMutex<()>,
    status: RwLock<Status>,
    cancel: RwLock<Option<Cancellation>>,
    workers: RwLock<Vec<JoinHandle<Result<()>>>>,
    counters: RwLock<HashMap<String, (ComponentKind, ComponentId, ProjectNodeSequence, Arc<Counter>)>>,
    component_status: Arc<RwLock<HashMap<String, ComponentState>>>,
    restart_count: AtomicU64,
}

impl Project {
    pub fn new(id: ProjectId, spec: ProjectSpec, factory: Arc<dyn ComponentFactory>) -> Result<Self> {
        let topology = spec.validate()?;
        Ok(Self {
            id,
            topology,
            spec,
            factory,
            lifecycle: AsyncMutex::new(()),
            status: RwLock::new(Status::Stopped),
            cancel: RwLock::new(None),
            workers: RwLock::new(Vec::new()),
            counters: RwLock::new(HashMap::new()),
            component_status: Arc::new(RwLock::new(HashMap::new())),
            restart_count: AtomicU64::new(0),
        })
    }

    pub fn status(&self) -> Status {
        self.status.read().clone()
    }

    /// Snapshot of every component's counter, keyed by node id, for the
    /// stats collector's per-tick sweep.
    pub fn counters(&self) -> Vec<(ComponentKind, ComponentId, ProjectNodeSequence, Arc<Counter>)> {
        self.counters.read().values().cloned().collect()
    }

    /// Snapshot of every component's runtime status, for the health
    /// monitor's sweep (spec §4.1 "Component health"). Updated the instant a
    /// worker task exits, not only when `stop` is called.
    pub fn component_states(&self) -> Vec<ComponentState> {
        self.component_status.read().values().cloned().collect()
    }

    /// Builds and opens every component, wires the channel edges, and spawns
    /// one worker task per node. All-or-nothing: if any component fails to
    /// build or open, every component already spawned this call is cancelled
    /// and awaited before the error is surfaced, so `start` never returns
    /// `Ok` (or `Running`) with a partially-materialized graph.
    pub async fn start(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        if self.status().is_running() {
            return Ok(());
        }
        *self.status.write() = Status::Starting;

        match self.start_inner().await {
            Ok(()) => {
                *self.status.write() = Status::Running;
                info!(project = %self.id, "project started");
                Ok(())
            }
            Err(e) => {
                *self.status.write() = Status::Error(Arc::new(e.clone()));
                Err(e)
            }
        }
    }

    async fn start_inner(&self) -> Result<()> {
        let cancel = Cancellation::new();
        let node_by_id: HashMap<&str, &crate::dag::NodeSpec> =
            self.spec.nodes.iter().map(|n| (n.id.as_str(), n)).collect();

        // Bounded channel per edge, one entry per `(from, to)` pair so a
        // node with multiple downstream edges gets an independent mailbox
        // per consumer rather than one shared fan-out queue.
        let mut senders: HashMap<String, Vec<mpsc::Sender<hub_core::envelope::Envelope>>> = HashMap::new();
        let mut receivers: HashMap<String, mpsc::Receiver<hub_core::envelope::Envelope>> = HashMap::new();
        for node_id in &self.topology.order {
            for downstream in self.topology.outgoing.get(node_id).into_iter().flatten() {
                let (tx, rx) = mpsc::channel(EDGE_CAPACITY);
                senders.entry(node_id.clone()).or_default().push(tx);
                receivers.insert(format!("{node_id}->{downstream}"), rx);
            }
        }

        let mut handles = Vec::new();
        let mut counters = HashMap::new();
        let status_map = self.component_status.clone();
        let restart_count = self.restart_count.load(Ordering::Relaxed);

        for node_id in &self.topology.order {
            let node = node_by_id[node_id.as_str()];
            let meta = ComponentMeta {
                kind: node.kind,
                id: node.id.clone(),
                source: node.source.clone(),
            };
            let component_id = ComponentId::new(&node.id);
            let pns = self.topology.pns_of(&node.id).clone();
            let counter = Arc::new(Counter::new());
            counters.insert(node.id.clone(), (node.kind, component_id.clone(), pns.clone(), counter.clone()));
            let ctx = ErrorContext::new()
                .with_project(self.id.clone())
                .with_pns(pns.clone())
                .with_component(component_id.clone());

            let downstream_txs: Vec<_> = senders.get(node_id).cloned().unwrap_or_default();

            // Every adapter is opened here, before its worker is spawned, so
            // an open failure surfaces synchronously to this loop instead of
            // inside the spawned task — the project must never reach
            // `Running` with an adapter that failed to open (spec §4.1's
            // Start contract).
            let built: Result<JoinHandle<Result<()>>> = match node.kind {
                hub_core::component::ComponentKind::Input => match self.factory.build_input(&meta).await {
                    Ok(mut input) => match input.open().await {
                        Ok(()) => Ok(spawn_tracked(
                            status_map.clone(),
                            node_id.clone(),
                            node.kind,
                            component_id.clone(),
                            pns.clone(),
                            restart_count,
                            worker::run_input(
                                self.id.clone(),
                                pns.clone(),
                                component_id.clone(),
                                cancel.clone(),
                                input,
                                counter,
                                downstream_txs,
                            ),
                        )),
                        Err(e) => Err(e.with_context(ctx.clone())),
                    },
                    Err(e) => Err(e),
                },
                hub_core::component::ComponentKind::Output => {
                    let upstream_key = self
                        .topology
                        .outgoing
                        .iter()
                        .find(|(_, outs)| outs.contains(node_id))
                        .map(|(from, _)| format!("{from}->{node_id}"));
                    let upstream = upstream_key.and_then(|k| receivers.remove(&k));
                    match upstream {
                        Some(upstream) => match self.factory.build_output(&meta).await {
                            Ok(mut output) => match output.open().await {
                                Ok(()) => Ok(spawn_tracked(
                                    status_map.clone(),
                                    node_id.clone(),
                                    node.kind,
                                    component_id.clone(),
                                    pns.clone(),
                                    restart_count,
                                    worker::run_output(
                                        self.id.clone(),
                                        pns.clone(),
                                        component_id.clone(),
                                        cancel.clone(),
                                        output,
                                        counter,
                                        upstream,
                                    ),
                                )),
                                Err(e) => Err(e.with_context(ctx.clone())),
                            },
                            Err(e) => Err(e),
                        },
                        None => Err(HubError::invalid_config(format!("output {node_id} has no upstream edge"))),
                    }
                }
                hub_core::component::ComponentKind::Ruleset | hub_core::component::ComponentKind::Plugin => {
                    let upstream_key = self
                        .topology
                        .outgoing
                        .iter()
                        .find(|(_, outs)| outs.contains(node_id))
                        .map(|(from, _)| format!("{from}->{node_id}"));
                    let upstream = upstream_key.and_then(|k| receivers.remove(&k));
                    match upstream {
                        Some(upstream) => match self.factory.build_ruleset(&meta).await {
                            Ok(ruleset) => Ok(spawn_tracked(
                                status_map.clone(),
                                node_id.clone(),
                                node.kind,
                                component_id.clone(),
                                pns.clone(),
                                restart_count,
                                worker::run_ruleset(
                                    self.id.clone(),
                                    pns.clone(),
                                    component_id.clone(),
                                    cancel.clone(),
                                    ruleset,
                                    counter,
                                    upstream,
                                    downstream_txs,
                                ),
                            )),
                            Err(e) => Err(e),
                        },
                        None => Err(HubError::invalid_config(format!("node {node_id} has no upstream edge"))),
                    }
                }
                hub_core::component::ComponentKind::Project => {
                    Err(HubError::invalid_config("a project node cannot be materialized as a component"))
                }
            };

            match built {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    // Teardown-on-partial-failure: cancel everything already
                    // spawned and wait for it to unwind before surfacing the
                    // error, so `start` never leaves orphaned workers behind.
                    cancel.cancel();
                    for handle in handles {
                        let _ = handle.await;
                    }
                    return Err(e);
                }
            }
        }

        *self.cancel.write() = Some(cancel);
        *self.workers.write() = handles;
        *self.counters.write() = counters;
        Ok(())
    }

    /// Cancels every worker and waits up to `timeout` for them to exit. A
    /// worker still running past the deadline is abandoned: its task keeps
    /// running detached and a warning is logged, matching spec §4.1's
    /// documented "abandon with warning" semantics rather than blocking
    /// `Stop` forever on a wedged adapter.
    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        if self.status().is_terminal_stopped() {
            return Ok(());
        }
        *self.status.write() = Status::Stopping;

        let Some(cancel) = self.cancel.write().take() else {
            *self.status.write() = Status::Stopped;
            return Ok(());
        };
        cancel.cancel();

        let handles = std::mem::take(&mut *self.workers.write());
        let joined = tokio::time::timeout(timeout, futures_join_all(handles)).await;
        match joined {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        warn!(project = %self.id, error = %e, "worker task panicked during stop");
                    }
                }
            }
            Err(_) => {
                warn!(project = %self.id, "stop timed out; abandoning workers that did not exit in time");
            }
        }

        *self.status.write() = Status::Stopped;
        info!(project = %self.id, "project stopped");
        Ok(())
    }

    pub async fn restart(&self, stop_timeout: Duration) -> Result<()> {
        self.stop(stop_timeout).await?;
        self.restart_count.fetch_add(1, Ordering::Relaxed);
        self.start().await
    }
}

async fn futures_join_all(handles: Vec<JoinHandle<Result<()>>>) -> Vec<std::result::Result<(), tokio::task::JoinError>> {
    let mut out = Vec::with_capacity(handles.len());
    for handle in handles {
        out.push(handle.await.map(|_| ()));
    }
    out
}

/// Records a component's initial `Running` state, spawns its worker, and
/// updates the same status entry to `Stopped`/`Error` the instant the
/// worker future resolves — whether that's from cancellation during a
/// normal `Stop` or from a runtime failure while the project is otherwise
/// healthy (spec §7: "ComponentFailure on an input/output ... does not tear
/// down peer components").
fn spawn_tracked(
    status_map: Arc<RwLock<HashMap<String, ComponentState>>>,
    node_id: String,
    kind: ComponentKind,
    component_id: ComponentId,
    pns: ProjectNodeSequence,
    restart_count: u64,
    fut: impl std::future::Future<Output = Result<()>> + Send + 'static,
) -> JoinHandle<Result<()>> {
    status_map.write().insert(
        node_id.clone(),
        ComponentState {
            kind,
            component_id,
            pns,
            status: Status::Running,
            started_at: Some(Instant::now()),
            restart_count,
        },
    );
    tokio::spawn(async move {
        let result = fut.await;
        if let Some(entry) = status_map.write().get_mut(&node_id) {
            entry.status = match &result {
                Ok(()) => Status::Stopped,
                Err(e) => Status::Error(Arc::new(e.clone())),
            };
        }
        result
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::test_support::TestFactory;
    use hub_core::component::ComponentKind;
    use hub_core::envelope::{Envelope, Value};

    fn envelope_with(seq: i32) -> Envelope {
        let mut env = Envelope::new();
        env.insert("seq", Value::Number(seq as f64));
        env
    }

    #[tokio::test]
    async fn happy_path_delivers_input_through_ruleset_to_output() {
        let factory = TestFactory::new(1);
        factory.register_input("i1", vec![envelope_with(1), envelope_with(2)]);
        let mut out_rx = factory.register_output("o1");

        let spec = ProjectSpec::new()
            .with_node("i1", ComponentKind::Input, "")
            .with_node("r1", ComponentKind::Ruleset, "")
            .with_node("o1", ComponentKind::Output, "")
            .with_edge("i1", "r1")
            .with_edge("r1", "o1");
        let project = Project::new(ProjectId::new("p1"), spec, factory.clone()).unwrap();

        project.start().await.unwrap();
        assert!(project.status().is_running());

        let first = out_rx.recv().await.unwrap();
        let second = out_rx.recv().await.unwrap();
        assert_eq!(first, envelope_with(1));
        assert_eq!(second, envelope_with(2));

        project.stop(Duration::from_secs(1)).await.unwrap();
        assert!(project.status().is_terminal_stopped());
    }

    #[tokio::test]
    async fn fan_out_delivers_to_every_downstream_output() {
        let factory = TestFactory::new(1);
        factory.register_input("i1", vec![envelope_with(5)]);
        let mut out1 = factory.register_output("o1");
        let mut out2 = factory.register_output("o2");

        let spec = ProjectSpec::new()
            .with_node("i1", ComponentKind::Input, "")
            .with_node("r1", ComponentKind::Ruleset, "")
            .with_node("o1", ComponentKind::Output, "")
            .with_node("o2", ComponentKind::Output, "")
            .with_edge("i1", "r1")
            .with_edge("r1", "o1")
            .with_edge("r1", "o2");
        let project = Project::new(ProjectId::new("p1"), spec, factory.clone()).unwrap();
        project.start().await.unwrap();

        assert_eq!(out1.recv().await.unwrap(), envelope_with(5));
        assert_eq!(out2.recv().await.unwrap(), envelope_with(5));

        project.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn backpressure_blocks_without_dropping_when_output_is_slow() {
        use hub_core::component::{InputComponent, OutputComponent, RulesetComponent};
        use std::sync::atomic::{AtomicBool, Ordering};
        use tokio::sync::Notify;

        struct GatedOutput {
            open: Arc<AtomicBool>,
            gate: Arc<Notify>,
            sink: mpsc::UnboundedSender<Envelope>,
        }

        #[async_trait::async_trait]
        impl OutputComponent for GatedOutput {
            async fn open(&mut self) -> Result<()> {
                Ok(())
            }
            async fn close(&mut self) -> Result<()> {
                Ok(())
            }
            async fn send(&mut self, envelope: Envelope) -> Result<()> {
                while !self.open.load(Ordering::Acquire) {
                    self.gate.notified().await;
                }
                let _ = self.sink.send(envelope);
                Ok(())
            }
        }

        struct GatedFactory {
            envelopes: std::sync::Mutex<Option<Vec<Envelope>>>,
            open: Arc<AtomicBool>,
            gate: Arc<Notify>,
            sink: mpsc::UnboundedSender<Envelope>,
        }

        #[async_trait::async_trait]
        impl ComponentFactory for GatedFactory {
            async fn build_input(&self, _meta: &ComponentMeta) -> Result<Box<dyn InputComponent>> {
                let envelopes = self.envelopes.lock().unwrap().take().unwrap_or_default();
                Ok(Box::new(crate::registry::test_support::ScriptedInput::new(envelopes)))
            }

            async fn build_output(&self, _meta: &ComponentMeta) -> Result<Box<dyn OutputComponent>> {
                Ok(Box::new(GatedOutput {
                    open: self.open.clone(),
                    gate: self.gate.clone(),
                    sink: self.sink.clone(),
                }))
            }

            async fn build_ruleset(&self, _meta: &ComponentMeta) -> Result<Box<dyn RulesetComponent>> {
                unreachable!("this project declares no ruleset node")
            }
        }

        // More envelopes than the edge channel can hold unread, so the input
        // worker is forced to block on a full mpsc::Sender while the output
        // stays gated shut.
        let total = crate::worker::EDGE_CAPACITY + 50;
        let envelopes: Vec<Envelope> = (0..total as i32).map(envelope_with).collect();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));
        let gate = Arc::new(Notify::new());
        let factory: Arc<dyn ComponentFactory> = Arc::new(GatedFactory {
            envelopes: std::sync::Mutex::new(Some(envelopes.clone())),
            open: open.clone(),
            gate: gate.clone(),
            sink: tx,
        });

        let spec = ProjectSpec::new()
            .with_node("i1", ComponentKind::Input, "")
            .with_node("o1", ComponentKind::Output, "")
            .with_edge("i1", "o1");
        let project = Project::new(ProjectId::new("p1"), spec, factory).unwrap();
        project.start().await.unwrap();

        // Give the input worker a head start filling the bounded edge
        // channel while the output is still gated shut; it must block
        // rather than drop once the channel is full.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(project.status().is_running());

        open.store(true, Ordering::Release);
        gate.notify_waiters();

        let mut received = Vec::with_capacity(total);
        for _ in 0..total {
            let env = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("output drained within deadline")
                .expect("channel not closed early");
            received.push(env);
        }
        assert_eq!(received, envelopes);

        project.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_any_worker_spawns() {
        let factory = TestFactory::new(1);
        let spec = ProjectSpec::new().with_node("r1", ComponentKind::Ruleset, "");
        // r1 has no input edge, so start() must fail without spawning it.
        let project = Project::new(ProjectId::new("p1"), spec, factory).unwrap();
        let err = project.start().await.unwrap_err();
        assert_eq!(err.category(), hub_core::error::ErrorCategory::NonRetryable);
        assert!(matches!(project.status(), Status::Error(_)));
    }

    #[tokio::test]
    async fn an_adapter_that_fails_to_open_tears_down_the_partially_started_graph() {
        use hub_core::component::{InputComponent, OutputComponent, RulesetComponent};

        struct FailingOutput;
        #[async_trait::async_trait]
        impl OutputComponent for FailingOutput {
            async fn open(&mut self) -> Result<()> {
                Err(HubError::component_failure("broker unreachable"))
            }
            async fn close(&mut self) -> Result<()> {
                Ok(())
            }
            async fn send(&mut self, _envelope: Envelope) -> Result<()> {
                Ok(())
            }
        }

        struct PartiallyFailingFactory {
            inner: Arc<TestFactory>,
        }

        #[async_trait::async_trait]
        impl ComponentFactory for PartiallyFailingFactory {
            async fn build_input(&self, meta: &ComponentMeta) -> Result<Box<dyn InputComponent>> {
                self.inner.build_input(meta).await
            }
            async fn build_output(&self, _meta: &ComponentMeta) -> Result<Box<dyn OutputComponent>> {
                Ok(Box::new(FailingOutput))
            }
            async fn build_ruleset(&self, meta: &ComponentMeta) -> Result<Box<dyn RulesetComponent>> {
                self.inner.build_ruleset(meta).await
            }
        }

        let inner = TestFactory::new(1);
        // Never polled: the output never opens, so start() must fail before
        // the input worker is ever given a chance to run.
        inner.register_input("i1", vec![envelope_with(1)]);
        let factory: Arc<dyn ComponentFactory> = Arc::new(PartiallyFailingFactory { inner });

        let spec = ProjectSpec::new()
            .with_node("i1", ComponentKind::Input, "")
            .with_node("o1", ComponentKind::Output, "")
            .with_edge("i1", "o1");
        let project = Project::new(ProjectId::new("p1"), spec, factory).unwrap();

        let err = project.start().await.unwrap_err();
        assert!(matches!(err, HubError::ComponentFailure { .. }));
        assert!(matches!(project.status(), Status::Error(_)));
        // No worker was left running: a second start() attempt is free to
        // try again rather than short-circuiting on `is_running`.
        assert!(project.component_states().iter().all(|c| !matches!(c.status, Status::Running)));
    }

    #[tokio::test]
    async fn a_ruleset_runtime_failure_marks_only_that_component_and_leaves_peers_running() {
        use hub_core::component::{InputComponent, OutputComponent, RulesetComponent};

        struct FailingRuleset;
        #[async_trait::async_trait]
        impl RulesetComponent for FailingRuleset {
            async fn evaluate(&self, _input: &Envelope) -> Result<Vec<Envelope>> {
                Err(HubError::component_failure("rule evaluation crashed"))
            }
        }

        struct FailingRulesetFactory {
            inner: Arc<TestFactory>,
        }

        #[async_trait::async_trait]
        impl ComponentFactory for FailingRulesetFactory {
            async fn build_input(&self, meta: &ComponentMeta) -> Result<Box<dyn InputComponent>> {
                self.inner.build_input(meta).await
            }
            async fn build_output(&self, meta: &ComponentMeta) -> Result<Box<dyn OutputComponent>> {
                self.inner.build_output(meta).await
            }
            async fn build_ruleset(&self, _meta: &ComponentMeta) -> Result<Box<dyn RulesetComponent>> {
                Ok(Box::new(FailingRuleset))
            }
        }

        let inner = TestFactory::new(1);
        inner.register_input("i1", vec![envelope_with(9)]);
        let _out_rx = inner.register_output("o1");
        let factory: Arc<dyn ComponentFactory> = Arc::new(FailingRulesetFactory { inner });

        let spec = ProjectSpec::new()
            .with_node("i1", ComponentKind::Input, "")
            .with_node("r1", ComponentKind::Ruleset, "")
            .with_node("o1", ComponentKind::Output, "")
            .with_edge("i1", "r1")
            .with_edge("r1", "o1");
        let project = Arc::new(Project::new(ProjectId::new("p1"), spec, factory).unwrap());
        project.start().await.unwrap();

        // Give the ruleset worker time to receive the envelope and fail.
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let states = project.component_states();
                let r1 = states.iter().find(|c| c.component_id.as_str() == "r1").unwrap();
                if matches!(r1.status, Status::Error(_)) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("ruleset worker reports its failure");

        // The project as a whole is still reported running — a runtime
        // ComponentFailure does not tear down peer components.
        assert!(project.status().is_running());
        let states = project.component_states();
        let i1 = states.iter().find(|c| c.component_id.as_str() == "i1").unwrap();
        assert!(matches!(i1.status, Status::Running));

        project.stop(Duration::from_secs(1)).await.unwrap();
    }
}
