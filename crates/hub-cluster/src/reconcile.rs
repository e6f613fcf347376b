//! Desired-vs-actual project reconciliation (spec §4.3): the five-step
//! loop that runs on every node, leader and follower alike. Idempotent by
//! construction — each step reads the latest KV values, so a reconcile run
//! that races a concurrent `SetDesired` just resolves on the next tick.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hub_core::error::Result;
use hub_kv::KvClient;
use hub_pipeline::Project;
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::leader::current_leader;
use crate::ops;

/// Resolves a project id to a runnable, not-yet-started [`Project`]. The
/// concrete source format (YAML/XML component text, the embedded
/// rule-expression evaluator) lives outside this crate; this seam is to
/// `ProjectReconciler` what `ComponentFactory` is to `hub_pipeline::Project`.
#[async_trait]
pub trait ProjectSource: Send + Sync {
    async fn load(&self, project_id: &str) -> Result<Arc<Project>>;
}

const DESIRED_RUNNING: &str = "running";

pub struct ReconcileReport {
    pub started: Vec<String>,
    pub stopped: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Runs on a single node; owns no KV state itself beyond the handle to the
/// running [`Project`] instances it started, since "actual" is always
/// re-derived from the KV store on the next tick rather than cached.
pub struct ProjectReconciler<C: KvClient> {
    client: Arc<C>,
    node_id: String,
    source: Arc<dyn ProjectSource>,
    stop_timeout: Duration,
    running: RwLock<HashMap<String, Arc<Project>>>,
}

impl<C: KvClient> ProjectReconciler<C> {
    pub fn new(client: Arc<C>, node_id: impl Into<String>, source: Arc<dyn ProjectSource>, stop_timeout: Duration) -> Self {
        Self {
            client,
            node_id: node_id.into(),
            source,
            stop_timeout,
            running: RwLock::new(HashMap::new()),
        }
    }

    /// Snapshot of every project this node currently believes it is
    /// running, for a caller (e.g. the stats collector) that needs to sweep
    /// their counters without duplicating this reconciler's bookkeeping.
    pub fn running_snapshot(&self) -> Vec<Arc<Project>> {
        self.running.read().values().cloned().collect()
    }

    /// Runs one pass of the five-step loop. Returns immediately without
    /// touching any project if no leader is currently advertised — a
    /// follower must not start work before it has seen `leader-ready` at
    /// least once.
    pub async fn reconcile_once(&self) -> Result<ReconcileReport> {
        if current_leader(self.client.as_ref()).await?.is_none() {
            return Ok(ReconcileReport {
                started: Vec::new(),
                stopped: Vec::new(),
                failed: Vec::new(),
            });
        }

        let desired: HashSet<String> = self
            .client
            .hash_get_all(&hub_core::keys::proj_desired(&self.node_id))
            .await?
            .into_iter()
            .filter(|(_, status)| status == DESIRED_RUNNING)
            .map(|(id, _)| id)
            .collect();

        let actual: HashMap<String, String> = self
            .client
            .hash_get_all(&hub_core::keys::proj_actual(&self.node_id))
            .await?
            .into_iter()
            .collect();

        let mut started = Vec::new();
        let mut stopped = Vec::new();
        let mut failed = Vec::new();

        for project_id in desired.iter() {
            let already_running = actual.get(project_id).map(|s| s == "running").unwrap_or(false);
            if already_running {
                continue;
            }
            match self.start_project(project_id).await {
                Ok(()) => started.push(project_id.clone()),
                Err(e) => failed.push((project_id.clone(), e.to_string())),
            }
        }

        let currently_running_ids: Vec<String> = actual
            .iter()
            .filter(|(_, status)| status.as_str() == "running")
            .map(|(id, _)| id.clone())
            .collect();
        for project_id in currently_running_ids {
            if !desired.contains(&project_id) {
                self.stop_project(&project_id).await?;
                stopped.push(project_id);
            }
        }

        Ok(ReconcileReport { started, stopped, failed })
    }

    async fn start_project(&self, project_id: &str) -> Result<()> {
        let project = match self.source.load(project_id).await {
            Ok(p) => p,
            Err(e) => {
                self.mark_actual(project_id, "error", Some(e.to_string())).await?;
                return Err(e);
            }
        };
        match project.start().await {
            Ok(()) => {
                self.running.write().insert(project_id.to_string(), project);
                self.mark_actual(project_id, "running", None).await?;
                ops::record(self.client.as_ref(), &self.node_id, "start", project_id, None).await?;
                info!(project = %project_id, node = %self.node_id, "project started by reconciler");
                Ok(())
            }
            Err(e) => {
                self.mark_actual(project_id, "error", Some(e.to_string())).await?;
                ops::record(
                    self.client.as_ref(),
                    &self.node_id,
                    "start_failed",
                    project_id,
                    Some(e.to_string()),
                )
                .await?;
                Err(e)
            }
        }
    }

    async fn stop_project(&self, project_id: &str) -> Result<()> {
        let project = self.running.write().remove(project_id);
        if let Some(project) = project {
            if let Err(e) = project.stop(self.stop_timeout).await {
                warn!(project = %project_id, error = %e, "error while stopping project during reconciliation");
            }
        }
        self.mark_actual(project_id, "stopped", None).await?;
        ops::record(self.client.as_ref(), &self.node_id, "stop", project_id, None).await
    }

    async fn mark_actual(&self, project_id: &str, status: &str, last_error: Option<String>) -> Result<()> {
        self.client
            .hash_set(&hub_core::keys::proj_actual(&self.node_id), project_id, status)
            .await?;
        self.client
            .hash_set(
                &hub_core::keys::proj_ts(&self.node_id),
                project_id,
                &chrono::Utc::now().to_rfc3339(),
            )
            .await?;
        if let Some(err) = last_error {
            self.client
                .hash_set(&hub_core::keys::proj_actual(&self.node_id), &format!("{project_id}:last_error"), &err)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_core::ids::ProjectId;
    use hub_kv::InMemoryKv;
    use hub_pipeline::registry::test_support::TestFactory;
    use hub_pipeline::ProjectSpec;

    struct StaticSource {
        factory: Arc<TestFactory>,
    }

    #[async_trait]
    impl ProjectSource for StaticSource {
        async fn load(&self, project_id: &str) -> Result<Arc<Project>> {
            let spec = ProjectSpec::new()
                .with_node("i1", hub_core::component::ComponentKind::Input, "")
                .with_node("o1", hub_core::component::ComponentKind::Output, "")
                .with_edge("i1", "o1");
            Ok(Arc::new(Project::new(
                ProjectId::new(project_id),
                spec,
                self.factory.clone(),
            )?))
        }
    }

    async fn publish_leader_ready(client: &InMemoryKv) {
        client
            .set(
                &hub_core::keys::leader_ready(),
                r#"{"node_id":"n1","timestamp":"now","ready":true}"#,
                Some(30),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn follower_skips_reconciliation_before_leader_ready_is_observed() {
        let client = Arc::new(InMemoryKv::new());
        let factory = TestFactory::new(1);
        factory.register_input("i1", vec![]);
        let _ = factory.register_output("o1");
        let reconciler = ProjectReconciler::new(
            client.clone(),
            "n1",
            Arc::new(StaticSource { factory }),
            Duration::from_secs(1),
        );
        client
            .hash_set(&hub_core::keys::proj_desired("n1"), "proj-a", "running")
            .await
            .unwrap();

        let report = reconciler.reconcile_once().await.unwrap();
        assert!(report.started.is_empty());
    }

    #[tokio::test]
    async fn desired_running_not_yet_actual_is_started() {
        let client = Arc::new(InMemoryKv::new());
        publish_leader_ready(&client).await;
        let factory = TestFactory::new(1);
        factory.register_input("i1", vec![]);
        let _ = factory.register_output("o1");
        let reconciler = ProjectReconciler::new(
            client.clone(),
            "n1",
            Arc::new(StaticSource { factory }),
            Duration::from_secs(1),
        );
        client
            .hash_set(&hub_core::keys::proj_desired("n1"), "proj-a", "running")
            .await
            .unwrap();

        let report = reconciler.reconcile_once().await.unwrap();
        assert_eq!(report.started, vec!["proj-a"]);
        let actual = client
            .hash_get(&hub_core::keys::proj_actual("n1"), "proj-a")
            .await
            .unwrap();
        assert_eq!(actual.as_deref(), Some("running"));
    }

    #[tokio::test]
    async fn actual_running_no_longer_desired_is_stopped() {
        let client = Arc::new(InMemoryKv::new());
        publish_leader_ready(&client).await;
        let factory = TestFactory::new(1);
        factory.register_input("i1", vec![]);
        let _ = factory.register_output("o1");
        let reconciler = ProjectReconciler::new(
            client.clone(),
            "n1",
            Arc::new(StaticSource { factory }),
            Duration::from_secs(1),
        );
        client
            .hash_set(&hub_core::keys::proj_desired("n1"), "proj-a", "running")
            .await
            .unwrap();
        reconciler.reconcile_once().await.unwrap();

        client.hash_delete(&hub_core::keys::proj_desired("n1"), "proj-a").await.unwrap();
        let report = reconciler.reconcile_once().await.unwrap();
        assert_eq!(report.stopped, vec!["proj-a"]);
        let actual = client
            .hash_get(&hub_core::keys::proj_actual("n1"), "proj-a")
            .await
            .unwrap();
        assert_eq!(actual.as_deref(), Some("stopped"));
    }
}
