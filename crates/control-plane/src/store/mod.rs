//! Persistence for clusters and workflow runs.
//!
//! Every mutation is a single filtered update applied atomically by the
//! backend: a Lua script on Redis, one lock section in memory.

mod memory;
mod redis_store;

pub use memory::{MemoryClusterStore, MemoryWorkflowRunStore};
pub use redis_store::{RedisClusterStore, RedisWorkflowRunStore};

use async_trait::async_trait;
use serde_json::{Map, Value};

use control_common::error::Result;
use control_common::{Cluster, WorkflowRun};

/// Selects the cluster record an update applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterFilter {
    pub cluster_id: String,
    /// Only match while the stored key equals this value
    pub access_key: Option<String>,
    /// Only match while `is_removed` equals this value
    pub is_removed: Option<bool>,
}

impl ClusterFilter {
    pub fn by_id(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            access_key: None,
            is_removed: None,
        }
    }

    pub fn with_access_key(mut self, access_key: impl Into<String>) -> Self {
        self.access_key = Some(access_key.into());
        self
    }

    pub fn not_removed(mut self) -> Self {
        self.is_removed = Some(false);
        self
    }

    pub fn matches(&self, cluster: &Cluster) -> bool {
        cluster.cluster_id == self.cluster_id
            && self.access_key.as_ref().is_none_or(|k| *k == cluster.access_key)
            && self.is_removed.is_none_or(|r| r == cluster.is_removed)
    }

    /// Field guards beyond the key, as stored field names
    fn guards(&self) -> Map<String, Value> {
        let mut guards = Map::new();
        if let Some(ref key) = self.access_key {
            guards.insert("access_key".into(), Value::from(key.clone()));
        }
        if let Some(removed) = self.is_removed {
            guards.insert("is_removed".into(), Value::from(removed));
        }
        guards
    }
}

/// Field changes applied to a matched cluster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterPatch {
    pub access_key: Option<String>,
    pub clear_token: bool,
    pub is_registered: Option<bool>,
    pub is_cluster_confirmed: Option<bool>,
    pub is_removed: Option<bool>,
    pub updated_at: i64,
}

impl ClusterPatch {
    /// Bootstrap → confirmed transition with a freshly rotated key
    pub fn confirm(new_access_key: String, now: i64) -> Self {
        Self {
            access_key: Some(new_access_key),
            clear_token: true,
            is_registered: Some(true),
            is_cluster_confirmed: Some(true),
            is_removed: None,
            updated_at: now,
        }
    }

    /// Soft delete
    pub fn remove(now: i64) -> Self {
        Self {
            is_removed: Some(true),
            updated_at: now,
            ..Self::default()
        }
    }

    pub fn apply(&self, cluster: &mut Cluster) {
        if let Some(ref key) = self.access_key {
            cluster.access_key = key.clone();
        }
        if self.clear_token {
            cluster.token = None;
        }
        if let Some(registered) = self.is_registered {
            cluster.is_registered = registered;
        }
        if let Some(confirmed) = self.is_cluster_confirmed {
            cluster.is_cluster_confirmed = confirmed;
        }
        if let Some(removed) = self.is_removed {
            cluster.is_removed = removed;
        }
        cluster.updated_at = self.updated_at;
    }

    /// Fields to overwrite, as stored field names
    fn set_fields(&self) -> Map<String, Value> {
        let mut set = Map::new();
        if let Some(ref key) = self.access_key {
            set.insert("access_key".into(), Value::from(key.clone()));
        }
        if let Some(registered) = self.is_registered {
            set.insert("is_registered".into(), Value::from(registered));
        }
        if let Some(confirmed) = self.is_cluster_confirmed {
            set.insert("is_cluster_confirmed".into(), Value::from(confirmed));
        }
        if let Some(removed) = self.is_removed {
            set.insert("is_removed".into(), Value::from(removed));
        }
        set.insert("updated_at".into(), Value::from(self.updated_at));
        set
    }

    /// Fields to delete, as stored field names
    fn unset_fields(&self) -> Vec<&'static str> {
        if self.clear_token { vec!["token"] } else { Vec::new() }
    }
}

/// Cluster identity records
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Insert a new cluster; fails if the ID is taken
    async fn insert(&self, cluster: &Cluster) -> Result<()>;

    /// Load a cluster, `NotFound` if absent
    async fn get(&self, cluster_id: &str) -> Result<Cluster>;

    /// Apply `patch` to the cluster matching `filter`; returns matched count
    async fn update(&self, filter: &ClusterFilter, patch: &ClusterPatch) -> Result<u64>;
}

/// Workflow run progress records
#[async_trait]
pub trait WorkflowRunStore: Send + Sync {
    /// Upsert `run` under `workflow_id`; returns modified count (0 when the
    /// stored run already has this content or is completed)
    async fn update(&self, workflow_id: &str, run: &WorkflowRun) -> Result<u64>;
}
