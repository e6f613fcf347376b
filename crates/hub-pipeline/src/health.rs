//! Component health monitor (spec §4.1): periodically sweeps every tracked
//! project's per-component status and assembles a structured error list.
//! This monitor only reports — it never restarts a project on the caller's
//! behalf, since automatic restart policy belongs to the cluster
//! coordinator layer, not the runtime that merely exposes status.

use std::sync::Arc;
use std::time::Duration;

use hub_core::component::ComponentKind;
use hub_core::error::HubError;
use hub_core::ids::{ComponentId, ProjectId, ProjectNodeSequence};
use parking_lot::RwLock;
use tracing::warn;

use crate::project::Project;

/// One component currently reporting `Status::Error`, as surfaced by
/// [`Project::component_states`].
#[derive(Clone, Debug)]
pub struct ComponentError {
    pub component_id: ComponentId,
    pub pns: ProjectNodeSequence,
    pub kind: ComponentKind,
    pub cause: Arc<HubError>,
}

/// A project's health as of one sweep: empty `component_errors` means every
/// tracked component reported something other than `Error`.
#[derive(Clone, Debug)]
pub struct HealthRecord {
    pub project_id: ProjectId,
    pub component_errors: Vec<ComponentError>,
}

impl HealthRecord {
    pub fn is_healthy(&self) -> bool {
        self.component_errors.is_empty()
    }
}

/// Periodic sweep over a fixed set of projects, assembling and republishing
/// each one's structured component error list.
pub struct HealthMonitor {
    projects: Vec<Arc<Project>>,
    interval: Duration,
    records: RwLock<Vec<HealthRecord>>,
}

impl HealthMonitor {
    pub fn new(projects: Vec<Arc<Project>>, interval: Duration) -> Self {
        Self {
            projects,
            interval,
            records: RwLock::new(Vec::new()),
        }
    }

    /// Runs until `cancel` resolves, sweeping every tracked project on each
    /// tick.
    pub async fn run(&self, cancel: hub_core::context::Cancellation) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    self.sweep();
                }
            }
        }
    }

    /// The health records produced by the most recent sweep, in the order
    /// the projects were registered.
    pub fn latest(&self) -> Vec<HealthRecord> {
        self.records.read().clone()
    }

    /// Reads every project's component states, builds one [`HealthRecord`]
    /// per project, logs a warning for each errored component, and republishes
    /// the list for [`HealthMonitor::latest`] to return.
    fn sweep(&self) -> Vec<HealthRecord> {
        let records: Vec<HealthRecord> = self
            .projects
            .iter()
            .map(|project| {
                let component_errors: Vec<ComponentError> = project
                    .component_states()
                    .into_iter()
                    .filter_map(|state| match state.status {
                        hub_core::status::Status::Error(cause) => Some(ComponentError {
                            component_id: state.component_id,
                            pns: state.pns,
                            kind: state.kind,
                            cause,
                        }),
                        _ => None,
                    })
                    .collect();

                for component_error in &component_errors {
                    warn!(
                        project = %project.id,
                        component = %component_error.component_id,
                        pns = %component_error.pns,
                        error = %component_error.cause,
                        "component reporting error status"
                    );
                }

                HealthRecord {
                    project_id: project.id.clone(),
                    component_errors,
                }
            })
            .collect();

        *self.records.write() = records.clone();
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::ProjectSpec;
    use crate::registry::test_support::TestFactory;
    use hub_core::component::{ComponentKind, ComponentMeta, InputComponent, OutputComponent, RulesetComponent};
    use hub_core::context::Cancellation;
    use hub_core::envelope::Envelope;
    use hub_core::ids::ProjectId;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn sweep_reports_no_errors_for_a_healthy_project() {
        let factory = TestFactory::new(1);
        factory.register_input("i1", vec![]);
        let _ = factory.register_output("o1");
        let spec = ProjectSpec::new()
            .with_node("i1", ComponentKind::Input, "")
            .with_node("o1", ComponentKind::Output, "")
            .with_edge("i1", "o1");
        let project = Arc::new(Project::new(ProjectId::new("p1"), spec, factory).unwrap());
        project.start().await.unwrap();

        let monitor = HealthMonitor::new(vec![project.clone()], StdDuration::from_millis(10));
        let records = monitor.sweep();
        assert_eq!(records.len(), 1);
        assert!(records[0].is_healthy());
        assert!(monitor.latest()[0].is_healthy());

        project.stop(StdDuration::from_secs(1)).await.unwrap();
        let _ = Cancellation::new();
    }

    #[tokio::test]
    async fn sweep_surfaces_a_failed_ruleset_without_flagging_the_project_unhealthy_overall() {
        use hub_core::error::{HubError, Result};

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
        impl crate::registry::ComponentFactory for FailingRulesetFactory {
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
        inner.register_input("i1", vec![{
            let mut env = Envelope::new();
            env.insert("seq", hub_core::envelope::Value::Number(1.0));
            env
        }]);
        let _out_rx = inner.register_output("o1");
        let factory: Arc<dyn crate::registry::ComponentFactory> = Arc::new(FailingRulesetFactory { inner });

        let spec = ProjectSpec::new()
            .with_node("i1", ComponentKind::Input, "")
            .with_node("r1", ComponentKind::Ruleset, "")
            .with_node("o1", ComponentKind::Output, "")
            .with_edge("i1", "r1")
            .with_edge("r1", "o1");
        let project = Arc::new(Project::new(ProjectId::new("p1"), spec, factory).unwrap());
        project.start().await.unwrap();

        let monitor = HealthMonitor::new(vec![project.clone()], StdDuration::from_millis(10));

        let records = tokio::time::timeout(StdDuration::from_secs(2), async {
            loop {
                let records = monitor.sweep();
                if !records[0].is_healthy() {
                    return records;
                }
                tokio::time::sleep(StdDuration::from_millis(5)).await;
            }
        })
        .await
        .expect("the ruleset's failure is surfaced before the deadline");

        assert_eq!(records[0].component_errors.len(), 1);
        assert_eq!(records[0].component_errors[0].component_id.as_str(), "r1");
        assert!(project.status().is_running());

        project.stop(StdDuration::from_secs(1)).await.unwrap();
    }
}
