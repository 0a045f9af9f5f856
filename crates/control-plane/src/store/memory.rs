//! In-process stores for development and tests.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use control_common::error::Result;
use control_common::{Cluster, ControlPlaneError, WorkflowRun};

use super::{ClusterFilter, ClusterPatch, ClusterStore, WorkflowRunStore};

#[derive(Default)]
pub struct MemoryClusterStore {
    clusters: RwLock<HashMap<String, Cluster>>,
}

impl MemoryClusterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClusterStore for MemoryClusterStore {
    async fn insert(&self, cluster: &Cluster) -> Result<()> {
        let mut clusters = self.clusters.write().await;
        if clusters.contains_key(&cluster.cluster_id) {
            return Err(ControlPlaneError::Persistence(format!(
                "cluster {} already exists",
                cluster.cluster_id
            )));
        }
        clusters.insert(cluster.cluster_id.clone(), cluster.clone());
        Ok(())
    }

    async fn get(&self, cluster_id: &str) -> Result<Cluster> {
        self.clusters
            .read()
            .await
            .get(cluster_id)
            .cloned()
            .ok_or_else(|| ControlPlaneError::NotFound(format!("cluster {}", cluster_id)))
    }

    async fn update(&self, filter: &ClusterFilter, patch: &ClusterPatch) -> Result<u64> {
        let mut clusters = self.clusters.write().await;
        match clusters.get_mut(&filter.cluster_id) {
            Some(cluster) if filter.matches(cluster) => {
                patch.apply(cluster);
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}

/// Runs keyed by workflow ID, then run ID
#[derive(Default)]
pub struct MemoryWorkflowRunStore {
    runs: RwLock<HashMap<String, HashMap<String, WorkflowRun>>>,
}

impl MemoryWorkflowRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn get(&self, workflow_id: &str, workflow_run_id: &str) -> Option<WorkflowRun> {
        self.runs
            .read()
            .await
            .get(workflow_id)
            .and_then(|runs| runs.get(workflow_run_id))
            .cloned()
    }
}

#[async_trait]
impl WorkflowRunStore for MemoryWorkflowRunStore {
    async fn update(&self, workflow_id: &str, run: &WorkflowRun) -> Result<u64> {
        let mut workflows = self.runs.write().await;
        let runs = workflows.entry(workflow_id.to_string()).or_default();

        if let Some(existing) = runs.get(&run.workflow_run_id) {
            if run.is_noop_over(existing) {
                return Ok(0);
            }
        }

        runs.insert(run.workflow_run_id.clone(), run.clone());
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(data: &str, completed: bool, at: i64) -> WorkflowRun {
        WorkflowRun {
            workflow_run_id: "r1".into(),
            execution_data: data.into(),
            completed,
            last_updated: at,
        }
    }

    #[tokio::test]
    async fn test_identical_run_is_not_modified() {
        let store = MemoryWorkflowRunStore::new();

        assert_eq!(store.update("w1", &run("a", false, 1)).await.unwrap(), 1);
        assert_eq!(store.update("w1", &run("a", false, 2)).await.unwrap(), 0);
        assert_eq!(store.update("w1", &run("b", false, 3)).await.unwrap(), 1);
        assert_eq!(store.update("w1", &run("b", true, 4)).await.unwrap(), 1);
        assert_eq!(store.update("w1", &run("c", false, 5)).await.unwrap(), 0);

        let stored = store.get("w1", "r1").await.unwrap();
        assert_eq!(stored.execution_data, "b");
        assert!(stored.completed);
    }

    #[tokio::test]
    async fn test_missing_cluster() {
        let store = MemoryClusterStore::new();
        assert!(matches!(
            store.get("nope").await,
            Err(ControlPlaneError::NotFound(_))
        ));
        let matched = store
            .update(&ClusterFilter::by_id("nope"), &ClusterPatch::remove(1))
            .await
            .unwrap();
        assert_eq!(matched, 0);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let store = MemoryClusterStore::new();
        let cluster = Cluster::bootstrap(
            "c1".into(),
            crate::registry::tests::cluster_input("a", "p1"),
            "k0".into(),
            "token".into(),
        );

        tokio_test::block_on(async {
            tokio_test::assert_ok!(store.insert(&cluster).await);
            tokio_test::assert_err!(store.insert(&cluster).await);

            // The first record is untouched
            let stored = store.get("c1").await.unwrap();
            assert_eq!(stored.access_key, "k0");
        });
    }
}
