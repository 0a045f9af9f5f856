//! Redis-backed stores.
//!
//! Records are JSON strings. Filtered updates run as Lua scripts so the
//! match and the write happen in one server-side step.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use control_common::constants::redis_keys::{CLUSTER_PREFIX, WORKFLOW_RUNS_PREFIX};
use control_common::error::Result;
use control_common::{Cluster, ControlPlaneError, WorkflowRun};

use super::{ClusterFilter, ClusterPatch, ClusterStore, WorkflowRunStore};

// KEYS[1] cluster key; ARGV[1] guards, ARGV[2] set fields, ARGV[3] unset fields
const UPDATE_CLUSTER_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then return 0 end
local doc = cjson.decode(raw)
for k, v in pairs(cjson.decode(ARGV[1])) do
  if doc[k] ~= v then return 0 end
end
for k, v in pairs(cjson.decode(ARGV[2])) do doc[k] = v end
for _, k in ipairs(cjson.decode(ARGV[3])) do doc[k] = nil end
redis.call('SET', KEYS[1], cjson.encode(doc))
return 1
"#;

// KEYS[1] workflow runs hash; ARGV[1] run id, ARGV[2] run JSON.
// Mirrors WorkflowRun::is_noop_over.
const UPDATE_RUN_SCRIPT: &str = r#"
local run = cjson.decode(ARGV[2])
local raw = redis.call('HGET', KEYS[1], ARGV[1])
if raw then
  local existing = cjson.decode(raw)
  if existing.completed or (existing.execution_data == run.execution_data
      and existing.completed == run.completed) then
    return 0
  end
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
return 1
"#;

fn persistence(err: impl std::fmt::Display) -> ControlPlaneError {
    ControlPlaneError::Persistence(err.to_string())
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| ControlPlaneError::Internal(e.to_string()))
}

pub struct RedisClusterStore {
    redis: ConnectionManager,
    update_script: redis::Script,
}

impl RedisClusterStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis,
            update_script: redis::Script::new(UPDATE_CLUSTER_SCRIPT),
        }
    }

    fn key(cluster_id: &str) -> String {
        format!("{}{}", CLUSTER_PREFIX, cluster_id)
    }
}

#[async_trait]
impl ClusterStore for RedisClusterStore {
    async fn insert(&self, cluster: &Cluster) -> Result<()> {
        let mut conn = self.redis.clone();
        let inserted: bool = conn
            .set_nx(Self::key(&cluster.cluster_id), encode(cluster)?)
            .await
            .map_err(persistence)?;

        if !inserted {
            return Err(persistence(format!(
                "cluster {} already exists",
                cluster.cluster_id
            )));
        }
        Ok(())
    }

    async fn get(&self, cluster_id: &str) -> Result<Cluster> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn.get(Self::key(cluster_id)).await.map_err(persistence)?;

        match raw {
            Some(data) => serde_json::from_str(&data).map_err(persistence),
            None => Err(ControlPlaneError::NotFound(format!("cluster {}", cluster_id))),
        }
    }

    async fn update(&self, filter: &ClusterFilter, patch: &ClusterPatch) -> Result<u64> {
        let mut conn = self.redis.clone();
        let matched: u64 = self
            .update_script
            .key(Self::key(&filter.cluster_id))
            .arg(encode(&filter.guards())?)
            .arg(encode(&patch.set_fields())?)
            .arg(encode(&patch.unset_fields())?)
            .invoke_async(&mut conn)
            .await
            .map_err(persistence)?;

        Ok(matched)
    }
}

pub struct RedisWorkflowRunStore {
    redis: ConnectionManager,
    update_script: redis::Script,
}

impl RedisWorkflowRunStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis,
            update_script: redis::Script::new(UPDATE_RUN_SCRIPT),
        }
    }
}

#[async_trait]
impl WorkflowRunStore for RedisWorkflowRunStore {
    async fn update(&self, workflow_id: &str, run: &WorkflowRun) -> Result<u64> {
        let mut conn = self.redis.clone();
        let modified: u64 = self
            .update_script
            .key(format!("{}{}", WORKFLOW_RUNS_PREFIX, workflow_id))
            .arg(&run.workflow_run_id)
            .arg(encode(run)?)
            .invoke_async(&mut conn)
            .await
            .map_err(persistence)?;

        Ok(modified)
    }
}
