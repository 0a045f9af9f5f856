//! Live fan-out to subscribers and directed requests to connected agents.
//!
//! Delivery is fire-and-forget: each subscriber owns a bounded channel, a
//! full or closed channel drops the item, and nothing is replayed to
//! subscribers that connect later.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};

use control_common::{ClusterAction, ClusterEvent, ClusterSnapshot, WorkflowRunEvent};

/// Who an event is addressed to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Subscribers of one project, plus global subscribers
    Project(String),
    /// Global subscribers only
    Global,
}

/// Receiving half handed to a newly connected subscriber
pub struct Subscription<T> {
    pub id: u64,
    pub scope: Scope,
    pub receiver: mpsc::Receiver<T>,
}

/// Subscribers of one event type, grouped by scope
struct Topic<T> {
    name: &'static str,
    subscribers: RwLock<HashMap<Scope, HashMap<u64, mpsc::Sender<T>>>>,
}

impl<T: Clone> Topic<T> {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    async fn subscribe(&self, id: u64, scope: Scope, capacity: usize) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(capacity);
        self.subscribers
            .write()
            .await
            .entry(scope.clone())
            .or_default()
            .insert(id, tx);

        tracing::debug!(topic = self.name, subscriber = id, scope = ?scope, "Subscriber connected");

        Subscription {
            id,
            scope,
            receiver: rx,
        }
    }

    async fn unsubscribe(&self, scope: &Scope, id: u64) {
        let mut subscribers = self.subscribers.write().await;
        if let Some(group) = subscribers.get_mut(scope) {
            group.remove(&id);
            if group.is_empty() {
                subscribers.remove(scope);
            }
        }
    }

    /// Offer `item` to every subscriber of `scope`; returns how many took it
    async fn publish(&self, scope: &Scope, item: T) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        {
            let subscribers = self.subscribers.read().await;
            let mut groups = vec![Scope::Global];
            if let Scope::Project(_) = scope {
                groups.push(scope.clone());
            }

            for group in groups {
                let Some(senders) = subscribers.get(&group) else {
                    continue;
                };
                for (id, tx) in senders {
                    match tx.try_send(item.clone()) {
                        Ok(()) => delivered += 1,
                        Err(TrySendError::Full(_)) => {
                            tracing::warn!(topic = self.name, subscriber = id, "Subscriber lagging, event dropped");
                        }
                        Err(TrySendError::Closed(_)) => closed.push((group.clone(), *id)),
                    }
                }
            }
        }

        for (group, id) in closed {
            self.unsubscribe(&group, id).await;
        }

        delivered
    }

    async fn len(&self) -> usize {
        self.subscribers.read().await.values().map(HashMap::len).sum()
    }
}

/// Channel to one connected agent
struct AgentConnection {
    generation: u64,
    sender: mpsc::Sender<ClusterAction>,
}

/// Receiving half handed to a newly connected agent
pub struct AgentChannel {
    pub cluster_id: String,
    pub generation: u64,
    pub receiver: mpsc::Receiver<ClusterAction>,
}

/// Connection registry shared by every publish and directed send
pub struct EventBroadcaster {
    capacity: usize,
    next_id: AtomicU64,
    cluster_events: Topic<ClusterEvent>,
    workflow_runs: Topic<WorkflowRunEvent>,
    agents: RwLock<HashMap<String, AgentConnection>>,
}

/// Registry counts for monitoring
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct BroadcastStats {
    pub cluster_event_subscribers: usize,
    pub workflow_run_subscribers: usize,
    pub connected_agents: usize,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
            cluster_events: Topic::new("cluster-events"),
            workflow_runs: Topic::new("workflow-runs"),
            agents: RwLock::new(HashMap::new()),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Fan a cluster lifecycle event out to `scope`
    pub async fn publish(
        &self,
        event_kind: &str,
        title: &str,
        description: &str,
        snapshot: ClusterSnapshot,
        scope: Scope,
    ) -> usize {
        let event = ClusterEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type: event_kind.to_string(),
            event_name: title.to_string(),
            description: description.to_string(),
            cluster: snapshot,
        };

        let delivered = self.cluster_events.publish(&scope, event).await;
        tracing::debug!(event_kind = %event_kind, scope = ?scope, delivered, "Cluster event published");
        delivered
    }

    /// Fan a workflow run update out to watchers of its project
    pub async fn publish_workflow_run(&self, event: WorkflowRunEvent) -> usize {
        let scope = Scope::Project(event.project_id.clone());
        self.workflow_runs.publish(&scope, event).await
    }

    pub async fn subscribe(&self, scope: Scope) -> Subscription<ClusterEvent> {
        self.cluster_events
            .subscribe(self.next_id(), scope, self.capacity)
            .await
    }

    pub async fn unsubscribe(&self, subscription: &Subscription<ClusterEvent>) {
        self.cluster_events
            .unsubscribe(&subscription.scope, subscription.id)
            .await;
    }

    pub async fn subscribe_workflow_runs(&self, scope: Scope) -> Subscription<WorkflowRunEvent> {
        self.workflow_runs
            .subscribe(self.next_id(), scope, self.capacity)
            .await
    }

    pub async fn unsubscribe_workflow_runs(&self, subscription: &Subscription<WorkflowRunEvent>) {
        self.workflow_runs
            .unsubscribe(&subscription.scope, subscription.id)
            .await;
    }

    /// Register the channel for a connected agent, replacing any previous one
    pub async fn connect_agent(&self, cluster_id: &str) -> AgentChannel {
        let (tx, rx) = mpsc::channel(self.capacity);
        let generation = self.next_id();

        let previous = self.agents.write().await.insert(
            cluster_id.to_string(),
            AgentConnection {
                generation,
                sender: tx,
            },
        );
        if previous.is_some() {
            tracing::info!(cluster_id = %cluster_id, "Agent reconnected, previous channel replaced");
        }

        AgentChannel {
            cluster_id: cluster_id.to_string(),
            generation,
            receiver: rx,
        }
    }

    /// Drop the agent's channel if it is still the one registered
    pub async fn disconnect_agent(&self, channel: &AgentChannel) {
        let mut agents = self.agents.write().await;
        if agents
            .get(&channel.cluster_id)
            .is_some_and(|conn| conn.generation == channel.generation)
        {
            agents.remove(&channel.cluster_id);
            tracing::info!(cluster_id = %channel.cluster_id, "Agent disconnected");
        }
    }

    /// Deliver `action` to the agent of `cluster_id`; dropped if not connected
    pub async fn send_directed(&self, cluster_id: &str, action: ClusterAction) -> bool {
        let agents = self.agents.read().await;
        let Some(conn) = agents.get(cluster_id) else {
            tracing::warn!(
                cluster_id = %cluster_id,
                request_type = ?action.request_type,
                "Agent not connected, request dropped"
            );
            return false;
        };

        match conn.sender.try_send(action) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(cluster_id = %cluster_id, error = %e, "Agent channel unavailable, request dropped");
                false
            }
        }
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            cluster_event_subscribers: self.cluster_events.len().await,
            workflow_run_subscribers: self.workflow_runs.len().await,
            connected_agents: self.agents.read().await.len(),
        }
    }
}
