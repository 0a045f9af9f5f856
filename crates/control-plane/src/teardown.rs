//! Cluster deletion.
//!
//! Revocation always happens first and is the only step that can fail the
//! call. The agent is then asked to delete its own workload and, after that,
//! its configuration. Both requests are best-effort.

use std::sync::Arc;

use control_common::constants::status;
use control_common::error::Result;
use control_common::{ClusterAction, ControlPlaneError, ManifestTarget, RequestType};

use crate::broadcast::EventBroadcaster;
use crate::config::TeardownConfig;
use crate::registry::ClusterRegistry;

pub struct ClusterTeardown {
    registry: Arc<ClusterRegistry>,
    broadcaster: Arc<EventBroadcaster>,
    resources: TeardownConfig,
}

impl ClusterTeardown {
    pub fn new(
        registry: Arc<ClusterRegistry>,
        broadcaster: Arc<EventBroadcaster>,
        resources: TeardownConfig,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            resources,
        }
    }

    /// Delete requests in the order the agent must apply them:
    /// the workload stops before its configuration goes away
    fn cleanup_targets(&self, namespace: &str) -> [ManifestTarget; 2] {
        [
            ManifestTarget::deployment(&self.resources.agent_deployment, namespace),
            ManifestTarget::config_map(&self.resources.agent_config_map, namespace),
        ]
    }

    pub async fn teardown(&self, cluster_id: &str) -> Result<&'static str> {
        self.registry.revoke(cluster_id).await?;

        let cluster = match self.registry.verify(cluster_id).await {
            Ok(cluster) => cluster,
            Err(e) => {
                tracing::warn!(cluster_id = %cluster_id, error = %e, "Reload after revoke failed, skipping agent cleanup");
                return Ok(status::CLUSTER_DELETED);
            }
        };

        let Some(namespace) = cluster.agent_namespace.as_deref() else {
            tracing::warn!(cluster_id = %cluster_id, "Cluster has no agent namespace, skipping agent cleanup");
            return Ok(status::CLUSTER_DELETED);
        };

        for target in self.cleanup_targets(namespace) {
            let manifest = target
                .to_manifest()
                .map_err(|e| ControlPlaneError::Internal(e.to_string()))?;
            let action = ClusterAction {
                project_id: cluster.project_id.clone(),
                cluster_id: cluster.cluster_id.clone(),
                request_id: None,
                request_type: RequestType::Delete,
                k8s_manifest: manifest,
                namespace: namespace.to_string(),
            };

            let sent = self.broadcaster.send_directed(&cluster.cluster_id, action).await;
            tracing::info!(
                cluster_id = %cluster_id,
                kind = %target.kind,
                name = %target.metadata.name,
                sent,
                "Agent cleanup requested"
            );
        }

        Ok(status::CLUSTER_DELETED)
    }
}
