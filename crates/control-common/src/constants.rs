//! Shared constants for control plane components.

/// Default Redis connection URL
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default HTTP listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";

/// Length of bootstrap and rotated access keys
pub const ACCESS_KEY_LENGTH: usize = 32;

/// Registration token validity (24 hours)
pub const DEFAULT_REGISTRATION_TOKEN_TTL_SECS: u64 = 86_400;

/// How long a log requester waits for the agent to answer
pub const DEFAULT_LOG_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Age after which an orphaned pending log request is evicted
pub const DEFAULT_LOG_REQUEST_TTL_SECS: u64 = 120;

/// Interval of the pending log request sweeper
pub const DEFAULT_LOG_SWEEP_INTERVAL_SECS: u64 = 30;

/// Per-subscriber channel capacity; events beyond it are dropped
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 64;

/// Agent resources removed on teardown
pub mod agent_resources {
    /// Deployment running the agent workload
    pub const DEPLOYMENT_NAME: &str = "subscriber";

    /// ConfigMap holding the agent configuration
    pub const CONFIG_MAP_NAME: &str = "litmus-portal-config";
}

/// Lifecycle event kinds
pub mod event_kinds {
    /// Emitted once a cluster completes the confirmation handshake
    pub const CLUSTER_REGISTRATION: &str = "cluster-registration";

    /// Emitted for agent-reported events
    pub const CLUSTER_EVENT: &str = "cluster-event";
}

/// Status strings returned to agents and API callers
pub mod status {
    pub const EVENT_PUBLISHED: &str = "Event Published";
    pub const WORKFLOW_RUN_ACCEPTED: &str = "Workflow Run Accepted";
    pub const WORKFLOW_RUN_DISCARDED: &str = "Workflow Run Discarded[Duplicate Event]";
    pub const LOGS_SENT: &str = "LOGS SENT SUCCESSFULLY";
    pub const LOG_REQUEST_CANCELLED: &str = "LOG REQUEST CANCELLED";
    pub const CLUSTER_DELETED: &str = "Successfully deleted cluster";
}

/// Redis key prefixes
pub mod redis_keys {
    /// Cluster record: cluster:{cluster_id}
    pub const CLUSTER_PREFIX: &str = "cluster:";

    /// Workflow runs hash: workflow:runs:{workflow_id} -> {run_id: run}
    pub const WORKFLOW_RUNS_PREFIX: &str = "workflow:runs:";
}
