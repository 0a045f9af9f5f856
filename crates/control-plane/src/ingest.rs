//! Workflow run ingestion.
//!
//! Agents report run progress over an at-least-once transport, so the same
//! update may arrive several times. The store reports a zero modified count
//! for content it already holds, and that is the only duplicate signal: a
//! zero count ends the call with no forward.

use std::sync::Arc;

use control_common::constants::status;
use control_common::error::Result;
use control_common::{WorkflowRun, WorkflowRunEvent, WorkflowRunInput};

use crate::broadcast::EventBroadcaster;
use crate::registry::ClusterRegistry;
use crate::store::WorkflowRunStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted,
    /// Already applied; nothing forwarded
    Discarded,
}

impl IngestOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            Self::Accepted => status::WORKFLOW_RUN_ACCEPTED,
            Self::Discarded => status::WORKFLOW_RUN_DISCARDED,
        }
    }
}

pub struct WorkflowRunIngester {
    registry: Arc<ClusterRegistry>,
    runs: Arc<dyn WorkflowRunStore>,
    broadcaster: Arc<EventBroadcaster>,
}

impl WorkflowRunIngester {
    pub fn new(
        registry: Arc<ClusterRegistry>,
        runs: Arc<dyn WorkflowRunStore>,
        broadcaster: Arc<EventBroadcaster>,
    ) -> Self {
        Self {
            registry,
            runs,
            broadcaster,
        }
    }

    pub async fn handle(&self, input: WorkflowRunInput) -> Result<IngestOutcome> {
        let cluster = self.registry.authenticate(&input.identity()).await?;

        let now = chrono::Utc::now().timestamp();
        let run = WorkflowRun {
            workflow_run_id: input.workflow_run_id.clone(),
            execution_data: input.execution_data.clone(),
            completed: input.completed,
            last_updated: now,
        };

        let modified = self.runs.update(&input.workflow_id, &run).await.inspect_err(|e| {
            tracing::error!(
                cluster_id = %cluster.cluster_id,
                workflow_run_id = %input.workflow_run_id,
                error = %e,
                "Failed to store workflow run"
            );
        })?;

        if modified == 0 {
            tracing::debug!(
                cluster_id = %cluster.cluster_id,
                workflow_run_id = %input.workflow_run_id,
                "Duplicate workflow run discarded"
            );
            return Ok(IngestOutcome::Discarded);
        }

        let event = WorkflowRunEvent {
            cluster_id: cluster.cluster_id,
            cluster_name: cluster.cluster_name,
            project_id: cluster.project_id,
            workflow_id: input.workflow_id,
            workflow_name: input.workflow_name,
            workflow_run_id: input.workflow_run_id,
            execution_data: input.execution_data,
            completed: input.completed,
            last_updated: now,
        };
        self.broadcaster.publish_workflow_run(event).await;

        Ok(IngestOutcome::Accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Scope;
    use crate::registry::tests::{confirmed_cluster, registry_with};
    use crate::store::{MemoryClusterStore, MemoryWorkflowRunStore};
    use control_common::{ClusterIdentity, ControlPlaneError};

    struct Fixture {
        ingester: WorkflowRunIngester,
        broadcaster: Arc<EventBroadcaster>,
        identity: ClusterIdentity,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryClusterStore::new());
        let broadcaster = Arc::new(EventBroadcaster::new(32));
        let registry = Arc::new(registry_with(store.clone(), broadcaster.clone()));
        let identity = confirmed_cluster(&registry, store.as_ref(), "p1").await;
        let ingester = WorkflowRunIngester::new(
            registry,
            Arc::new(MemoryWorkflowRunStore::new()),
            broadcaster.clone(),
        );

        Fixture {
            ingester,
            broadcaster,
            identity,
        }
    }

    fn input(identity: &ClusterIdentity, data: &str, completed: bool) -> WorkflowRunInput {
        WorkflowRunInput {
            cluster_id: identity.cluster_id.clone(),
            access_key: identity.access_key.clone(),
            workflow_id: "w1".into(),
            workflow_run_id: "r1".into(),
            workflow_name: "pod-delete".into(),
            execution_data: data.into(),
            completed,
        }
    }

    #[tokio::test]
    async fn test_retransmissions_forward_once() {
        let f = fixture().await;
        let mut watcher = f.broadcaster.subscribe_workflow_runs(Scope::Project("p1".into())).await;

        let mut outcomes = Vec::new();
        for _ in 0..5 {
            outcomes.push(f.ingester.handle(input(&f.identity, "{\"phase\":\"Running\"}", false)).await.unwrap());
        }

        assert_eq!(outcomes[0], IngestOutcome::Accepted);
        assert!(outcomes[1..].iter().all(|o| *o == IngestOutcome::Discarded));

        let event = watcher.receiver.try_recv().unwrap();
        assert_eq!(event.cluster_id, f.identity.cluster_id);
        assert_eq!(event.cluster_name, "staging-eu");
        assert_eq!(event.project_id, "p1");
        assert_eq!(event.workflow_name, "pod-delete");
        assert!(watcher.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_progress_forwards_each_change() {
        let f = fixture().await;
        let mut watcher = f.broadcaster.subscribe_workflow_runs(Scope::Project("p1".into())).await;

        for (data, completed) in [("a", false), ("b", false), ("b", true), ("c", false)] {
            f.ingester.handle(input(&f.identity, data, completed)).await.unwrap();
        }

        let mut forwarded = Vec::new();
        while let Ok(event) = watcher.receiver.try_recv() {
            forwarded.push((event.execution_data, event.completed));
        }
        assert_eq!(
            forwarded,
            vec![("a".into(), false), ("b".into(), false), ("b".into(), true)]
        );
        assert_eq!(IngestOutcome::Discarded.status(), status::WORKFLOW_RUN_DISCARDED);
    }

    #[tokio::test]
    async fn test_unknown_or_unauthenticated_cluster() {
        let f = fixture().await;

        let mut unknown = input(&f.identity, "a", false);
        unknown.cluster_id = "missing".into();
        assert!(matches!(
            f.ingester.handle(unknown).await,
            Err(ControlPlaneError::NotFound(_))
        ));

        let mut wrong_key = input(&f.identity, "a", false);
        wrong_key.access_key = "stale".into();
        assert!(matches!(
            f.ingester.handle(wrong_key).await,
            Err(ControlPlaneError::AuthMismatch(_))
        ));
    }
}
