//! Core types shared across control plane components.
//!
//! Stored records use snake_case field names. Wire types (agent and API
//! inputs, responses, and events) keep the PascalCase names agents already
//! speak, e.g. `ClusterID` and `Serviceaccount`.

use serde::{Deserialize, Serialize};

/// Identity record for one registered agent cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub cluster_id: String,
    pub project_id: String,
    pub cluster_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub cluster_type: String,
    pub platform_name: String,

    /// Bootstrap secret until confirmation, rotated secret afterwards
    pub access_key: String,

    /// Registration token, present only before confirmation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    pub is_registered: bool,
    pub is_cluster_confirmed: bool,
    pub is_removed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serviceaccount: Option<String>,
    pub agent_scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_ns_exists: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_sa_exists: Option<bool>,

    /// Unix epoch seconds
    pub created_at: i64,
    /// Unix epoch seconds, refreshed on every mutation
    pub updated_at: i64,
}

impl Cluster {
    /// Build a freshly registered cluster in bootstrap phase
    pub fn bootstrap(
        cluster_id: String,
        input: ClusterInput,
        access_key: String,
        token: String,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            cluster_id,
            project_id: input.project_id,
            cluster_name: input.cluster_name,
            description: input.description,
            cluster_type: input.cluster_type,
            platform_name: input.platform_name,
            access_key,
            token: Some(token),
            is_registered: false,
            is_cluster_confirmed: false,
            is_removed: false,
            agent_namespace: input.agent_namespace,
            serviceaccount: input.serviceaccount,
            agent_scope: input.agent_scope,
            agent_ns_exists: input.agent_ns_exists,
            agent_sa_exists: input.agent_sa_exists,
            created_at: now,
            updated_at: now,
        }
    }

    /// True while the cluster still holds its bootstrap secret
    pub fn is_bootstrap(&self) -> bool {
        self.token.is_some() && !self.is_cluster_confirmed
    }

    /// Redacted view of this cluster, safe to embed in events
    pub fn snapshot(&self) -> ClusterSnapshot {
        ClusterSnapshot {
            cluster_id: self.cluster_id.clone(),
            project_id: self.project_id.clone(),
            cluster_name: self.cluster_name.clone(),
            description: self.description.clone(),
            cluster_type: self.cluster_type.clone(),
            platform_name: self.platform_name.clone(),
            is_registered: self.is_registered,
            is_cluster_confirmed: self.is_cluster_confirmed,
            is_removed: self.is_removed,
            agent_namespace: self.agent_namespace.clone(),
            serviceaccount: self.serviceaccount.clone(),
            agent_scope: self.agent_scope.clone(),
            agent_ns_exists: self.agent_ns_exists,
            agent_sa_exists: self.agent_sa_exists,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Cluster as seen by subscribers; never carries the access key or token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClusterSnapshot {
    #[serde(rename = "ClusterID")]
    pub cluster_id: String,
    #[serde(rename = "ProjectID")]
    pub project_id: String,
    pub cluster_name: String,
    pub description: Option<String>,
    pub cluster_type: String,
    pub platform_name: String,
    pub is_registered: bool,
    pub is_cluster_confirmed: bool,
    pub is_removed: bool,
    pub agent_namespace: Option<String>,
    pub serviceaccount: Option<String>,
    pub agent_scope: String,
    pub agent_ns_exists: Option<bool>,
    pub agent_sa_exists: Option<bool>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClusterInput {
    pub cluster_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "ProjectID")]
    pub project_id: String,
    pub cluster_type: String,
    pub platform_name: String,
    #[serde(default)]
    pub agent_namespace: Option<String>,
    #[serde(default)]
    pub serviceaccount: Option<String>,
    pub agent_scope: String,
    #[serde(default)]
    pub agent_ns_exists: Option<bool>,
    #[serde(default)]
    pub agent_sa_exists: Option<bool>,
}

/// Registration response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClusterRegResponse {
    #[serde(rename = "ClusterID")]
    pub cluster_id: String,
    pub token: String,
    pub cluster_name: String,
}

/// Identity an agent presents on confirmation and every later call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClusterIdentity {
    #[serde(rename = "ClusterID")]
    pub cluster_id: String,
    pub access_key: String,
}

/// Confirmation response, in the boolean-flag shape agents expect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClusterConfirmResponse {
    pub is_cluster_confirmed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_cluster_key: Option<String>,
    #[serde(rename = "ClusterID", default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
}

/// Lifecycle event reported by an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClusterEventInput {
    #[serde(rename = "ClusterID")]
    pub cluster_id: String,
    pub access_key: String,
    pub event_name: String,
    pub description: String,
}

/// Lifecycle event fanned out to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClusterEvent {
    #[serde(rename = "EventID")]
    pub event_id: String,
    pub event_type: String,
    pub event_name: String,
    pub description: String,
    pub cluster: ClusterSnapshot,
}

/// Workflow run progress reported by an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WorkflowRunInput {
    #[serde(rename = "ClusterID")]
    pub cluster_id: String,
    pub access_key: String,
    #[serde(rename = "WorkflowID")]
    pub workflow_id: String,
    #[serde(rename = "WorkflowRunID")]
    pub workflow_run_id: String,
    pub workflow_name: String,
    pub execution_data: String,
    pub completed: bool,
}

impl WorkflowRunInput {
    pub fn identity(&self) -> ClusterIdentity {
        ClusterIdentity {
            cluster_id: self.cluster_id.clone(),
            access_key: self.access_key.clone(),
        }
    }
}

/// Stored progress record for one workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub workflow_run_id: String,
    pub execution_data: String,
    pub completed: bool,
    /// Unix epoch seconds
    pub last_updated: i64,
}

impl WorkflowRun {
    /// True if storing `self` over `existing` would change nothing.
    /// Completed runs are frozen.
    pub fn is_noop_over(&self, existing: &WorkflowRun) -> bool {
        existing.completed
            || (existing.execution_data == self.execution_data
                && existing.completed == self.completed)
    }
}

/// Workflow run joined with its cluster, forwarded to watchers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WorkflowRunEvent {
    #[serde(rename = "ClusterID")]
    pub cluster_id: String,
    pub cluster_name: String,
    #[serde(rename = "ProjectID")]
    pub project_id: String,
    #[serde(rename = "WorkflowID")]
    pub workflow_id: String,
    pub workflow_name: String,
    #[serde(rename = "WorkflowRunID")]
    pub workflow_run_id: String,
    pub execution_data: String,
    pub completed: bool,
    pub last_updated: i64,
}

/// Pod log delivered by an agent in answer to a log request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PodLog {
    #[serde(rename = "ClusterID")]
    pub cluster_id: String,
    pub access_key: String,
    #[serde(rename = "RequestID")]
    pub request_id: String,
    pub pod_name: String,
    #[serde(rename = "WorkflowRunID")]
    pub workflow_run_id: String,
    pub pod_type: String,
    pub log: String,
}

impl PodLog {
    pub fn identity(&self) -> ClusterIdentity {
        ClusterIdentity {
            cluster_id: self.cluster_id.clone(),
            access_key: self.access_key.clone(),
        }
    }
}

/// Payload handed to the caller waiting on a log request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PodLogResponse {
    pub pod_name: String,
    #[serde(rename = "WorkflowRunID")]
    pub workflow_run_id: String,
    pub pod_type: String,
    pub log: String,
}

/// Dashboard request for the logs of one pod
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PodLogRequest {
    #[serde(rename = "ClusterID")]
    pub cluster_id: String,
    #[serde(rename = "WorkflowRunID")]
    pub workflow_run_id: String,
    pub pod_name: String,
    pub pod_namespace: String,
    pub pod_type: String,
}

/// Cluster deletion request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteClusterInput {
    #[serde(rename = "ClusterID")]
    pub cluster_id: String,
}

/// Plain status reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
        }
    }
}

/// Kind of operation an agent is asked to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Create,
    Update,
    Delete,
    Logs,
}

/// One outbound request to a single connected agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClusterAction {
    #[serde(rename = "ProjectID")]
    pub project_id: String,
    #[serde(rename = "ClusterID")]
    pub cluster_id: String,
    #[serde(rename = "RequestID", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub request_type: RequestType,
    pub k8s_manifest: String,
    pub namespace: String,
}

/// Kubernetes object reference serialized into `ClusterAction::k8s_manifest`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestTarget {
    pub api_version: String,
    pub kind: String,
    pub metadata: ManifestMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,
    pub namespace: String,
}

impl ManifestTarget {
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            metadata: ManifestMetadata {
                name: name.into(),
                namespace: namespace.into(),
            },
        }
    }

    pub fn deployment(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::new("apps/v1", "Deployment", name, namespace)
    }

    pub fn config_map(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::new("v1", "ConfigMap", name, namespace)
    }

    /// Serialize into the JSON manifest body agents apply
    pub fn to_manifest(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
