//! Pod log request correlation.
//!
//! A dashboard asks for a pod's logs; the control plane registers a pending
//! entry under a fresh request ID, forwards the request to the agent, and
//! waits. The agent later posts the log with that request ID, and the entry's
//! one-shot sink hands it to the waiter. The entry is taken out of the map
//! before sending, so each request ID is fulfilled at most once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, oneshot};

use control_common::constants::status;
use control_common::error::Result;
use control_common::{
    ClusterAction, ControlPlaneError, PodLog, PodLogRequest, PodLogResponse, RequestType,
};

use crate::broadcast::EventBroadcaster;
use crate::registry::ClusterRegistry;

struct PendingEntry {
    sink: oneshot::Sender<PodLogResponse>,
    created_at: Instant,
}

/// Request ID → single-use delivery sink
#[derive(Default)]
pub struct PendingLogRequests {
    entries: Mutex<HashMap<String, PendingEntry>>,
}

/// Receiving side of one pending log request
pub struct LogWaiter {
    request_id: String,
    receiver: oneshot::Receiver<PodLogResponse>,
    pending: Arc<PendingLogRequests>,
}

impl PendingLogRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a pending entry; refuses IDs that are already waiting
    pub async fn register(self: &Arc<Self>, request_id: String) -> Result<LogWaiter> {
        let (tx, rx) = oneshot::channel();
        let mut entries = self.entries.lock().await;
        if entries.contains_key(&request_id) {
            return Err(ControlPlaneError::InvalidInput(format!(
                "log request {} is already pending",
                request_id
            )));
        }
        entries.insert(
            request_id.clone(),
            PendingEntry {
                sink: tx,
                created_at: Instant::now(),
            },
        );

        Ok(LogWaiter {
            request_id,
            receiver: rx,
            pending: Arc::clone(self),
        })
    }

    /// Retire an entry, handing back its sink
    async fn take(&self, request_id: &str) -> Option<oneshot::Sender<PodLogResponse>> {
        self.entries.lock().await.remove(request_id).map(|e| e.sink)
    }

    pub async fn remove(&self, request_id: &str) -> bool {
        self.take(request_id).await.is_some()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Drop entries older than `ttl`; their waiters see the sink close
    pub async fn evict_expired(&self, ttl: Duration) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.created_at.elapsed() < ttl);
        before - entries.len()
    }
}

impl LogWaiter {
    /// Wait for the agent's answer, giving up after `timeout`
    pub async fn wait(self, timeout: Duration) -> Result<PodLogResponse> {
        let LogWaiter {
            request_id,
            receiver,
            pending,
        } = self;

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ControlPlaneError::Timeout(format!(
                "log request {} expired",
                request_id
            ))),
            Err(_) => {
                pending.remove(&request_id).await;
                Err(ControlPlaneError::Timeout(format!(
                    "no log for request {} within {:?}",
                    request_id, timeout
                )))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// No waiter: unknown, already answered, expired, or abandoned
    Cancelled,
}

impl DeliveryOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            Self::Delivered => status::LOGS_SENT,
            Self::Cancelled => status::LOG_REQUEST_CANCELLED,
        }
    }
}

pub struct LogRequestCorrelator {
    registry: Arc<ClusterRegistry>,
    pending: Arc<PendingLogRequests>,
    broadcaster: Arc<EventBroadcaster>,
}

impl LogRequestCorrelator {
    pub fn new(
        registry: Arc<ClusterRegistry>,
        pending: Arc<PendingLogRequests>,
        broadcaster: Arc<EventBroadcaster>,
    ) -> Self {
        Self {
            registry,
            pending,
            broadcaster,
        }
    }

    /// Hand an agent's pod log to the caller waiting on its request ID
    pub async fn deliver(&self, pod_log: PodLog) -> Result<DeliveryOutcome> {
        self.registry.authenticate(&pod_log.identity()).await?;

        let Some(sink) = self.pending.take(&pod_log.request_id).await else {
            tracing::debug!(request_id = %pod_log.request_id, "No waiter for pod log");
            return Ok(DeliveryOutcome::Cancelled);
        };

        let response = PodLogResponse {
            pod_name: pod_log.pod_name,
            workflow_run_id: pod_log.workflow_run_id,
            pod_type: pod_log.pod_type,
            log: pod_log.log,
        };

        match sink.send(response) {
            Ok(()) => {
                tracing::debug!(request_id = %pod_log.request_id, "Pod log delivered");
                Ok(DeliveryOutcome::Delivered)
            }
            Err(_) => {
                tracing::debug!(request_id = %pod_log.request_id, "Waiter gone before delivery");
                Ok(DeliveryOutcome::Cancelled)
            }
        }
    }

    /// Ask the cluster's agent for a pod log and wait for it
    pub async fn request(
        &self,
        request: PodLogRequest,
        timeout: Duration,
    ) -> Result<PodLogResponse> {
        let cluster = self.registry.verify(&request.cluster_id).await?;
        if cluster.is_removed {
            return Err(ControlPlaneError::NotFound(format!(
                "cluster {} was removed",
                cluster.cluster_id
            )));
        }

        let request_id = uuid::Uuid::new_v4().to_string();
        let waiter = self.pending.register(request_id.clone()).await?;

        let manifest = serde_json::to_string(&request)
            .map_err(|e| ControlPlaneError::Internal(e.to_string()))?;
        let action = ClusterAction {
            project_id: cluster.project_id,
            cluster_id: cluster.cluster_id.clone(),
            request_id: Some(request_id.clone()),
            request_type: RequestType::Logs,
            k8s_manifest: manifest,
            namespace: request.pod_namespace,
        };

        if !self.broadcaster.send_directed(&cluster.cluster_id, action).await {
            self.pending.remove(&request_id).await;
            return Err(ControlPlaneError::NotFound(format!(
                "no agent connected for cluster {}",
                cluster.cluster_id
            )));
        }

        waiter.wait(timeout).await
    }
}

/// Background task evicting orphaned log requests
pub async fn log_request_sweeper(
    pending: Arc<PendingLogRequests>,
    interval: Duration,
    ttl: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    tracing::info!(interval = ?interval, ttl = ?ttl, "Log request sweeper started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let evicted = pending.evict_expired(ttl).await;
                if evicted > 0 {
                    tracing::info!(evicted, "Evicted orphaned log requests");
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Log request sweeper shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::{confirmed_cluster, registry_with};
    use crate::store::MemoryClusterStore;
    use control_common::ClusterIdentity;

    struct Fixture {
        correlator: Arc<LogRequestCorrelator>,
        pending: Arc<PendingLogRequests>,
        broadcaster: Arc<EventBroadcaster>,
        identity: ClusterIdentity,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryClusterStore::new());
        let broadcaster = Arc::new(EventBroadcaster::new(8));
        let registry = Arc::new(registry_with(store.clone(), broadcaster.clone()));
        let identity = confirmed_cluster(&registry, store.as_ref(), "p1").await;
        let pending = Arc::new(PendingLogRequests::new());
        let correlator = Arc::new(LogRequestCorrelator::new(
            registry,
            pending.clone(),
            broadcaster.clone(),
        ));

        Fixture {
            correlator,
            pending,
            broadcaster,
            identity,
        }
    }

    fn pod_log(identity: &ClusterIdentity, request_id: &str) -> PodLog {
        PodLog {
            cluster_id: identity.cluster_id.clone(),
            access_key: identity.access_key.clone(),
            request_id: request_id.into(),
            pod_name: "pod-delete-abc".into(),
            workflow_run_id: "r1".into(),
            pod_type: "ChaosEngine".into(),
            log: "chaos injected".into(),
        }
    }

    #[tokio::test]
    async fn test_unknown_request_is_cancelled() {
        let f = fixture().await;
        let _waiter = f.pending.register("other".into()).await.unwrap();

        let outcome = f.correlator.deliver(pod_log(&f.identity, "req-1")).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Cancelled);
        assert_eq!(outcome.status(), status::LOG_REQUEST_CANCELLED);
        assert_eq!(f.pending.len().await, 1);
    }

    #[tokio::test]
    async fn test_delivers_exactly_once() {
        let f = fixture().await;
        let waiter = f.pending.register("req-1".into()).await.unwrap();

        let first = f.correlator.deliver(pod_log(&f.identity, "req-1")).await.unwrap();
        assert_eq!(first, DeliveryOutcome::Delivered);
        assert_eq!(f.pending.len().await, 0);

        let second = f.correlator.deliver(pod_log(&f.identity, "req-1")).await.unwrap();
        assert_eq!(second, DeliveryOutcome::Cancelled);

        let response = waiter.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(response.pod_name, "pod-delete-abc");
        assert_eq!(response.log, "chaos injected");
    }

    #[tokio::test]
    async fn test_failed_authentication_consumes_nothing() {
        let f = fixture().await;
        let _waiter = f.pending.register("req-1".into()).await.unwrap();

        let mut log = pod_log(&f.identity, "req-1");
        log.cluster_id = "missing".into();
        assert!(matches!(
            f.correlator.deliver(log).await,
            Err(ControlPlaneError::NotFound(_))
        ));

        let mut log = pod_log(&f.identity, "req-1");
        log.access_key = "stale".into();
        assert!(matches!(
            f.correlator.deliver(log).await,
            Err(ControlPlaneError::AuthMismatch(_))
        ));
        assert_eq!(f.pending.len().await, 1);
    }

    #[tokio::test]
    async fn test_abandoned_waiter_is_cancelled() {
        let f = fixture().await;
        let waiter = f.pending.register("req-1".into()).await.unwrap();
        drop(waiter);

        let outcome = f.correlator.deliver(pod_log(&f.identity, "req-1")).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Cancelled);
        assert_eq!(f.pending.len().await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_registration_refused() {
        let f = fixture().await;
        let _waiter = f.pending.register("req-1".into()).await.unwrap();
        assert!(matches!(
            f.pending.register("req-1".into()).await,
            Err(ControlPlaneError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_timeout_retires_entry() {
        let f = fixture().await;
        let waiter = f.pending.register("req-1".into()).await.unwrap();

        let result = waiter.wait(Duration::from_millis(10)).await;
        assert!(matches!(result, Err(ControlPlaneError::Timeout(_))));
        assert_eq!(f.pending.len().await, 0);
    }

    #[tokio::test]
    async fn test_evict_expired() {
        let f = fixture().await;
        let waiter = f.pending.register("req-1".into()).await.unwrap();

        assert_eq!(f.pending.evict_expired(Duration::from_secs(60)).await, 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(f.pending.evict_expired(Duration::from_millis(10)).await, 1);

        assert!(matches!(
            waiter.wait(Duration::from_secs(1)).await,
            Err(ControlPlaneError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_request_round_trip_through_agent() {
        let f = fixture().await;
        let mut agent = f.broadcaster.connect_agent(&f.identity.cluster_id).await;

        let request = PodLogRequest {
            cluster_id: f.identity.cluster_id.clone(),
            workflow_run_id: "r1".into(),
            pod_name: "pod-delete-abc".into(),
            pod_namespace: "litmus".into(),
            pod_type: "ChaosEngine".into(),
        };
        let correlator = f.correlator.clone();
        let waiting = tokio::spawn(async move {
            correlator.request(request, Duration::from_secs(5)).await
        });

        let action = agent.receiver.recv().await.unwrap();
        assert_eq!(action.request_type, RequestType::Logs);
        assert_eq!(action.namespace, "litmus");
        let request_id = action.request_id.unwrap();

        let outcome = f.correlator.deliver(pod_log(&f.identity, &request_id)).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Delivered);

        let response = waiting.await.unwrap().unwrap();
        assert_eq!(response.workflow_run_id, "r1");
    }

    #[tokio::test]
    async fn test_request_without_agent_fails_fast() {
        let f = fixture().await;
        let request = PodLogRequest {
            cluster_id: f.identity.cluster_id.clone(),
            workflow_run_id: "r1".into(),
            pod_name: "p".into(),
            pod_namespace: "litmus".into(),
            pod_type: "ChaosEngine".into(),
        };

        assert!(matches!(
            f.correlator.request(request, Duration::from_secs(5)).await,
            Err(ControlPlaneError::NotFound(_))
        ));
        assert_eq!(f.pending.len().await, 0);
    }
}
