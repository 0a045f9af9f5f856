//! Application state and shared resources.

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use std::sync::Arc;

use crate::broadcast::EventBroadcaster;
use crate::config::{AppConfig, StorageBackend};
use crate::identity::{RegistrationTokenIssuer, TokenIssuer};
use crate::ingest::WorkflowRunIngester;
use crate::logs::{LogRequestCorrelator, PendingLogRequests};
use crate::registry::ClusterRegistry;
use crate::store::{
    ClusterStore, MemoryClusterStore, MemoryWorkflowRunStore, RedisClusterStore,
    RedisWorkflowRunStore, WorkflowRunStore,
};
use crate::teardown::ClusterTeardown;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,

    /// Redis connection manager (auto-reconnecting), absent for memory storage
    pub redis: Option<ConnectionManager>,

    /// Subscriber and agent connection registry
    pub broadcaster: Arc<EventBroadcaster>,

    /// Pending log requests awaiting an agent answer
    pub pending_logs: Arc<PendingLogRequests>,

    /// Cluster identity lifecycle
    pub registry: Arc<ClusterRegistry>,

    /// Workflow run ingestion
    pub ingester: Arc<WorkflowRunIngester>,

    /// Pod log correlation
    pub logs: Arc<LogRequestCorrelator>,

    /// Cluster deletion
    pub teardown: Arc<ClusterTeardown>,
}

impl AppState {
    /// Create new application state, connecting to Redis when configured
    pub async fn new(config: AppConfig) -> Result<Self> {
        let issuer = RegistrationTokenIssuer::new(&config.token)
            .context("Failed to initialize registration token issuer")?;
        tracing::info!(public_key = %issuer.public_key_b64(), "Registration token issuer ready");
        let tokens: Arc<dyn TokenIssuer> = Arc::new(issuer);

        let (redis, clusters, runs): (
            Option<ConnectionManager>,
            Arc<dyn ClusterStore>,
            Arc<dyn WorkflowRunStore>,
        ) = match config.storage.backend {
            StorageBackend::Redis => {
                // Connect to Redis with connection manager (handles reconnection)
                let client = redis::Client::open(config.redis_url.as_str())
                    .context("Failed to create Redis client")?;
                let conn = ConnectionManager::new(client)
                    .await
                    .context("Failed to connect to Redis")?;
                (
                    Some(conn.clone()),
                    Arc::new(RedisClusterStore::new(conn.clone())),
                    Arc::new(RedisWorkflowRunStore::new(conn)),
                )
            }
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory storage, state is lost on restart");
                (
                    None,
                    Arc::new(MemoryClusterStore::new()),
                    Arc::new(MemoryWorkflowRunStore::new()),
                )
            }
        };

        Ok(Self::with_stores(config, redis, clusters, runs, tokens))
    }

    /// Wire the components around already-built collaborators
    pub fn with_stores(
        config: AppConfig,
        redis: Option<ConnectionManager>,
        clusters: Arc<dyn ClusterStore>,
        runs: Arc<dyn WorkflowRunStore>,
        tokens: Arc<dyn TokenIssuer>,
    ) -> Self {
        let broadcaster = Arc::new(EventBroadcaster::new(config.subscribers.channel_capacity));
        let pending_logs = Arc::new(PendingLogRequests::new());

        let registry = Arc::new(ClusterRegistry::new(clusters, tokens, broadcaster.clone()));
        let ingester = Arc::new(WorkflowRunIngester::new(
            registry.clone(),
            runs,
            broadcaster.clone(),
        ));
        let logs = Arc::new(LogRequestCorrelator::new(
            registry.clone(),
            pending_logs.clone(),
            broadcaster.clone(),
        ));
        let teardown = Arc::new(ClusterTeardown::new(
            registry.clone(),
            broadcaster.clone(),
            config.teardown.clone(),
        ));

        Self {
            config,
            redis,
            broadcaster,
            pending_logs,
            registry,
            ingester,
            logs,
            teardown,
        }
    }
}
